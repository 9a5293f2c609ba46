//! Call outcome history and the statistics derived from it.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Result of one completed call attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallOutcomeRecord {
    pub success: bool,
    pub duration: Duration,
    pub timestamp: Instant,
    pub was_timeout: bool,
}

/// Rates and latencies over the retained window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowSummary {
    pub window_calls: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub timeout_rate: f64,
    pub slow_call_rate: f64,
    pub avg_latency_secs: f64,
    pub p95_latency_secs: f64,
}

impl WindowSummary {
    fn empty() -> Self {
        Self {
            window_calls: 0,
            success_rate: 1.0,
            failure_rate: 0.0,
            timeout_rate: 0.0,
            slow_call_rate: 0.0,
            avg_latency_secs: 0.0,
            p95_latency_secs: 0.0,
        }
    }
}

/// Time-ordered outcome history. Records arrive in completion order, so the
/// oldest entry is always at the front.
#[derive(Debug, Default)]
pub(crate) struct OutcomeWindow {
    records: VecDeque<CallOutcomeRecord>,
}

impl OutcomeWindow {
    pub(crate) fn push(&mut self, record: CallOutcomeRecord) {
        self.records.push_back(record);
    }

    /// Drop every record older than `window` relative to `now`.
    pub(crate) fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.records.front() {
            if now.saturating_duration_since(front.timestamp) > window {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn summarize(&self, slow_call_threshold: Duration) -> WindowSummary {
        let total = self.records.len();
        if total == 0 {
            return WindowSummary::empty();
        }

        let mut successes = 0usize;
        let mut timeouts = 0usize;
        let mut slow = 0usize;
        let mut latencies: Vec<f64> = Vec::with_capacity(total);

        for record in &self.records {
            if record.success {
                successes += 1;
            }
            if record.was_timeout {
                timeouts += 1;
            }
            if record.duration > slow_call_threshold {
                slow += 1;
            }
            latencies.push(record.duration.as_secs_f64());
        }

        let n = total as f64;
        let success_rate = successes as f64 / n;
        let avg_latency_secs = latencies.iter().sum::<f64>() / n;

        latencies.sort_by(|a, b| a.total_cmp(b));
        // Nearest-rank percentile.
        let rank = ((0.95 * n).ceil() as usize).clamp(1, total);
        let p95_latency_secs = latencies[rank - 1];

        WindowSummary {
            window_calls: total,
            success_rate,
            failure_rate: 1.0 - success_rate,
            timeout_rate: timeouts as f64 / n,
            slow_call_rate: slow as f64 / n,
            avg_latency_secs,
            p95_latency_secs,
        }
    }
}
