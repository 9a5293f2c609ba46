//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Protected call:
//!     → registry.rs (look up / lazily create the named breaker)
//!     → circuit_breaker.rs (admit or reject, under the state mutex)
//!     → operation runs under call_timeout, outside the mutex
//!     → outcome.rs (record outcome, prune window)
//!     → circuit_breaker.rs (transition if thresholds crossed)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Breakers never retry; callers decide
//! - Timeout errors are distinct from upstream errors
//! - protect.rs gives decorator-style reuse without macros

pub mod circuit_breaker;
pub mod error;
pub mod outcome;
pub mod protect;
pub mod registry;

pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitState, Verdict};
pub use error::CallError;
pub use outcome::{CallOutcomeRecord, WindowSummary};
pub use protect::Protected;
pub use registry::CircuitBreakerRegistry;
