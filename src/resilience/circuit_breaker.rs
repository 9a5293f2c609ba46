//! Circuit breaker for downstream target protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: target assumed down, calls fail fast
//! - Half-Open: a bounded number of probe calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: next call attempt after recovery_timeout (lazy, no timer)
//! Half-Open → Closed: consecutive_successes >= success_threshold
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - Per-target breaker (not global)
//! - The state mutex is never held while the protected operation runs
//! - Half-open admits at most `success_threshold - consecutive_successes`
//!   concurrent probes, so the probe window cannot be over-admitted
//! - Timeouts count as failures but are tracked separately

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::error::CallError;
use crate::resilience::outcome::{CallOutcomeRecord, OutcomeWindow, WindowSummary};

/// Operating state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn metric_value(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a finished call feeds back into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
    /// Neither success nor failure (e.g. the caller cancelled the work).
    Neutral,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub total_rejections: u64,
    /// Seconds since the last recorded failure, if any.
    pub last_failure_secs_ago: Option<f64>,
    #[serde(flatten)]
    pub window: WindowSummary,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub slow_call_rate_threshold: f64,
}

impl BreakerStats {
    /// Closed, or recent traffic good enough to be trusted regardless of state.
    pub fn is_healthy(&self) -> bool {
        self.state == CircuitState::Closed
            || (self.window.success_rate >= 0.9
                && self.window.slow_call_rate <= self.slow_call_rate_threshold
                && self.window.timeout_rate <= 0.1)
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    probes_in_flight: u32,
    /// Bumped on every transition so stale probe slots are not released twice.
    generation: u64,
    history: OutcomeWindow,
    total_calls: u64,
    total_failures: u64,
    total_timeouts: u64,
    total_rejections: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure: None,
            probes_in_flight: 0,
            generation: 0,
            history: OutcomeWindow::default(),
            total_calls: 0,
            total_failures: 0,
            total_timeouts: 0,
            total_rejections: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Admission {
    probe: bool,
    generation: u64,
}

/// Per-target circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        metrics::record_breaker_state(&name, CircuitState::Closed.metric_value());
        Self {
            name,
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. Does not perform the lazy Open → Half-Open check.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `operation` under the breaker with the configured call timeout.
    /// Every error counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(operation, None, |_| Verdict::Failure).await
    }

    /// Like [`call`](Self::call) with a caller-supplied deadline.
    pub async fn call_with_timeout<F, Fut, T, E>(
        &self,
        operation: F,
        timeout: Duration,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(operation, Some(timeout), |_| Verdict::Failure).await
    }

    /// Run `operation` under the breaker, letting `classify` decide how an
    /// operation error feeds the state machine. The error itself is always
    /// returned unchanged.
    pub async fn call_classified<F, Fut, T, E, C>(
        &self,
        operation: F,
        timeout_override: Option<Duration>,
        classify: C,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> Verdict,
    {
        let Some(admission) = self.admit() else {
            return Err(CallError::CircuitOpen {
                name: self.name.clone(),
            });
        };
        let mut guard = AdmissionGuard {
            breaker: self,
            admission: Some(admission),
        };

        let timeout = timeout_override.unwrap_or_else(|| self.config.call_timeout());
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, operation()).await;
        let elapsed = started.elapsed();

        match result {
            Ok(Ok(value)) => {
                guard.settle(Verdict::Success, elapsed, false);
                Ok(value)
            }
            Ok(Err(e)) => {
                guard.settle(classify(&e), elapsed, false);
                Err(CallError::Upstream(e))
            }
            Err(_) => {
                guard.settle(Verdict::Failure, elapsed, true);
                tracing::warn!(breaker = %self.name, timeout_ms = timeout.as_millis() as u64, "Protected call timed out");
                Err(CallError::Timeout {
                    name: self.name.clone(),
                    timeout,
                })
            }
        }
    }

    /// Stats over the current monitor window.
    pub fn stats(&self) -> BreakerStats {
        let now = Instant::now();
        let mut st = self.lock();
        st.history.prune(now, self.config.monitor_window());

        BreakerStats {
            name: self.name.clone(),
            state: st.state,
            consecutive_failures: st.consecutive_failures,
            consecutive_successes: st.consecutive_successes,
            total_calls: st.total_calls,
            total_failures: st.total_failures,
            total_timeouts: st.total_timeouts,
            total_rejections: st.total_rejections,
            last_failure_secs_ago: st
                .last_failure
                .map(|at| now.saturating_duration_since(at).as_secs_f64()),
            window: st.history.summarize(self.config.slow_call_threshold()),
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            slow_call_rate_threshold: self.config.slow_call_rate_threshold,
        }
    }

    pub fn health_check(&self) -> bool {
        self.stats().is_healthy()
    }

    /// Return to Closed with empty history. Lifetime totals are kept.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.state = CircuitState::Closed;
        st.consecutive_failures = 0;
        st.consecutive_successes = 0;
        st.last_failure = None;
        st.probes_in_flight = 0;
        st.generation += 1;
        st.history.clear();
        drop(st);

        metrics::record_breaker_state(&self.name, CircuitState::Closed.metric_value());
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Open the circuit now, as if the threshold had just been crossed.
    pub fn force_open(&self) {
        let mut st = self.lock();
        self.transition(&mut st, CircuitState::Open);
        st.last_failure = Some(Instant::now());
        tracing::warn!(breaker = %self.name, "Circuit breaker forced open");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide admission, performing the lazy Open → Half-Open check.
    fn admit(&self) -> Option<Admission> {
        let mut st = self.lock();
        st.total_calls += 1;

        if st.state == CircuitState::Open {
            let recovered = st
                .last_failure
                .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout());
            if recovered {
                self.transition(&mut st, CircuitState::HalfOpen);
            }
        }

        let generation = st.generation;
        match st.state {
            CircuitState::Closed => return Some(Admission { probe: false, generation }),
            CircuitState::HalfOpen => {
                let budget = self.success_threshold();
                if st.consecutive_successes + st.probes_in_flight < budget {
                    st.probes_in_flight += 1;
                    return Some(Admission { probe: true, generation });
                }
            }
            CircuitState::Open => {}
        }

        st.total_rejections += 1;
        let state = st.state;
        drop(st);

        metrics::record_breaker_rejection(&self.name);
        tracing::debug!(breaker = %self.name, state = %state, "Call rejected");
        None
    }

    fn complete(&self, admission: Admission, verdict: Verdict, duration: Duration, timed_out: bool) {
        let now = Instant::now();
        let mut st = self.lock();

        if admission.probe && admission.generation == st.generation {
            st.probes_in_flight = st.probes_in_flight.saturating_sub(1);
        }

        match verdict {
            Verdict::Neutral => {}
            Verdict::Success => {
                st.history.push(CallOutcomeRecord {
                    success: true,
                    duration,
                    timestamp: now,
                    was_timeout: false,
                });
                st.consecutive_failures = 0;
                if st.state == CircuitState::HalfOpen {
                    st.consecutive_successes += 1;
                    if st.consecutive_successes >= self.success_threshold() {
                        self.transition(&mut st, CircuitState::Closed);
                    }
                }
            }
            Verdict::Failure => {
                st.history.push(CallOutcomeRecord {
                    success: false,
                    duration,
                    timestamp: now,
                    was_timeout: timed_out,
                });
                st.total_failures += 1;
                if timed_out {
                    st.total_timeouts += 1;
                }
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                st.last_failure = Some(now);

                let should_open = match st.state {
                    CircuitState::HalfOpen => true,
                    CircuitState::Closed => st.consecutive_failures >= self.failure_threshold(),
                    CircuitState::Open => false,
                };
                if should_open {
                    self.transition(&mut st, CircuitState::Open);
                }
            }
        }

        st.history.prune(now, self.config.monitor_window());
        drop(st);

        if verdict != Verdict::Neutral {
            let outcome = match (verdict, timed_out) {
                (Verdict::Success, _) => "success",
                (_, true) => "timeout",
                _ => "failure",
            };
            metrics::record_breaker_call(&self.name, outcome, duration);
        }
    }

    fn transition(&self, st: &mut BreakerState, to: CircuitState) {
        let from = st.state;
        if from == to {
            return;
        }

        st.state = to;
        st.generation += 1;
        st.probes_in_flight = 0;
        st.consecutive_successes = 0;
        if to == CircuitState::Closed {
            st.consecutive_failures = 0;
        }

        metrics::record_breaker_state(&self.name, to.metric_value());
        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = %from,
                consecutive_failures = st.consecutive_failures,
                "Circuit opened"
            ),
            _ => tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit state changed"),
        }
    }

    fn failure_threshold(&self) -> u32 {
        self.config.failure_threshold.max(1)
    }

    fn success_threshold(&self) -> u32 {
        self.config.success_threshold.max(1)
    }
}

/// Settles an admission exactly once. If the caller drops the call future
/// mid-flight the admission is released as neutral so a probe slot is not lost.
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Option<Admission>,
}

impl AdmissionGuard<'_> {
    fn settle(&mut self, verdict: Verdict, duration: Duration, timed_out: bool) {
        if let Some(admission) = self.admission.take() {
            self.breaker.complete(admission, verdict, duration, timed_out);
        }
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.complete(admission, Verdict::Neutral, Duration::ZERO, false);
        }
    }
}
