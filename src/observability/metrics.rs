//! Metrics collection and exposition.
//!
//! # Metrics
//! - `breaker_calls_total` (counter): completed calls by breaker, outcome
//! - `breaker_call_duration_seconds` (histogram): latency per breaker
//! - `breaker_rejections_total` (counter): calls shed while open / probing
//! - `breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `tasks_events_total` (counter): task lifecycle events by kind
//! - `tasks_active` (gauge): currently tracked tasks
//! - `tasks_utilization` (gauge): active / capacity
//! - `process_memory_utilization` (gauge): last reaper sample
//!
//! Without an installed recorder every call here is a no-op, so library users
//! that don't call [`init_metrics`] pay nothing.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_breaker_call(breaker: &str, outcome: &'static str, duration: Duration) {
    counter!("breaker_calls_total", "breaker" => breaker.to_string(), "outcome" => outcome).increment(1);
    histogram!("breaker_call_duration_seconds", "breaker" => breaker.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_breaker_rejection(breaker: &str) {
    counter!("breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_breaker_state(breaker: &str, state: u8) {
    gauge!("breaker_state", "breaker" => breaker.to_string()).set(state as f64);
}

pub fn record_task_event(event: &'static str) {
    record_task_events(event, 1);
}

pub fn record_task_events(event: &'static str, count: usize) {
    counter!("tasks_events_total", "event" => event).increment(count as u64);
}

pub fn record_task_gauges(active: usize, utilization: f64) {
    gauge!("tasks_active").set(active as f64);
    gauge!("tasks_utilization").set(utilization);
}

pub fn record_memory_utilization(utilization: f64) {
    gauge!("process_memory_utilization").set(utilization);
}
