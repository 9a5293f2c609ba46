//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the substrate.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Defaults for breakers created without an explicit config.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Per-target overrides, keyed by breaker name.
    pub breakers: HashMap<String, CircuitBreakerConfig>,

    /// Task manager settings.
    pub tasks: TaskManagerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin / health endpoint settings.
    pub admin: AdminConfig,
}

/// Circuit breaker settings. Immutable once a breaker is built from it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) that open the circuit.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a probe is allowed, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,

    /// Deadline applied to every admitted call, in milliseconds.
    pub call_timeout_ms: u64,

    /// How far back call outcomes are retained, in seconds.
    pub monitor_window_secs: u64,

    /// Calls slower than this count as slow, in milliseconds.
    pub slow_call_threshold_ms: u64,

    /// Maximum tolerable slow-call fraction before the breaker reports unhealthy.
    pub slow_call_rate_threshold: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            success_threshold: 3,
            call_timeout_ms: 30_000,
            monitor_window_secs: 300,
            slow_call_threshold_ms: 10_000,
            slow_call_rate_threshold: 0.5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Rounded up to whole seconds, so a sub-second window still retains history.
    pub fn with_monitor_window(mut self, window: Duration) -> Self {
        self.monitor_window_secs = window.as_secs() + u64::from(window.subsec_nanos() > 0);
        self
    }

    pub fn with_slow_call_threshold(mut self, threshold: Duration) -> Self {
        self.slow_call_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_slow_call_rate_threshold(mut self, rate: f64) -> Self {
        self.slow_call_rate_threshold = rate;
        self
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn monitor_window(&self) -> Duration {
        Duration::from_secs(self.monitor_window_secs)
    }

    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_threshold_ms)
    }
}

/// Task manager settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// Maximum concurrently tracked tasks (backpressure).
    pub capacity: usize,

    /// Reaper interval in seconds.
    pub cleanup_interval_secs: u64,

    /// Deadline for tasks submitted without an explicit timeout, in seconds.
    pub default_task_timeout_secs: u64,

    /// Memory utilization (0.0–1.0) above which the reaper evicts tasks.
    pub memory_utilization_threshold: f64,

    /// How long emergency eviction waits for evicted tasks to wind down, in milliseconds.
    pub eviction_grace_ms: u64,

    /// Upper bound on `stop()` used by the host process, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            cleanup_interval_secs: 30,
            default_task_timeout_secs: 300,
            memory_utilization_threshold: 0.85,
            eviction_grace_ms: 100,
            shutdown_timeout_secs: 30,
        }
    }
}

impl TaskManagerConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }

    pub fn eviction_grace(&self) -> Duration {
        Duration::from_millis(self.eviction_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin / health endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin and health endpoints.
    pub enabled: bool,

    /// API key for the `/admin` routes (Bearer token).
    pub api_key: String,

    /// Bind address for the admin listener.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
