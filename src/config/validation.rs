//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. Every violation is reported, not just the first.

use thiserror::Error;

use crate::config::schema::{CircuitBreakerConfig, ResilienceConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a loaded configuration.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);
    for (name, breaker) in &config.breakers {
        if name.trim().is_empty() {
            errors.push(ValidationError::new("breakers", "breaker name must not be empty"));
        }
        validate_breaker(&format!("breakers.{}", name), breaker, &mut errors);
    }

    let tasks = &config.tasks;
    if tasks.capacity == 0 {
        errors.push(ValidationError::new("tasks.capacity", "must be greater than 0"));
    }
    if tasks.cleanup_interval_secs == 0 {
        errors.push(ValidationError::new("tasks.cleanup_interval_secs", "must be greater than 0"));
    }
    if tasks.default_task_timeout_secs == 0 {
        errors.push(ValidationError::new("tasks.default_task_timeout_secs", "must be greater than 0"));
    }
    if !in_unit_range(tasks.memory_utilization_threshold) || tasks.memory_utilization_threshold == 0.0 {
        errors.push(ValidationError::new(
            "tasks.memory_utilization_threshold",
            "must be within (0.0, 1.0]",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(prefix: &str, config: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    let positive = [
        ("failure_threshold", config.failure_threshold as u64),
        ("success_threshold", config.success_threshold as u64),
        ("call_timeout_ms", config.call_timeout_ms),
        ("monitor_window_secs", config.monitor_window_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::new(format!("{}.{}", prefix, field), "must be greater than 0"));
        }
    }

    if !in_unit_range(config.slow_call_rate_threshold) {
        errors.push(ValidationError::new(
            format!("{}.slow_call_rate_threshold", prefix),
            "must be within [0.0, 1.0]",
        ));
    }
}

fn in_unit_range(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}
