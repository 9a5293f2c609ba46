//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, task manager, reaper produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → health/ reports (JSON, served by admin/)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never interpolated identifiers
//! - Metrics are cheap (no-op without a recorder)
//! - State transitions are logged; per-call outcomes only counted

pub mod logging;
pub mod metrics;
