//! Resilience substrate for services that call unreliable remote targets.
//!
//! Two halves share one [`ResilienceContext`]:
//! - [`resilience`]: per-target circuit breakers and the registry that owns them
//! - [`tasks`]: a bounded background task manager with reaper, eviction, and
//!   graceful shutdown
//!
//! The host binary adds configuration, logging, metrics, and the admin/health
//! HTTP surface around them.

pub mod admin;
pub mod config;
pub mod context;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod tasks;

pub use config::schema::ResilienceConfig;
pub use context::ResilienceContext;
pub use lifecycle::Shutdown;
pub use resilience::{CallError, CircuitBreaker, CircuitBreakerRegistry, CircuitState, Verdict};
pub use tasks::{TaskError, TaskHandle, TaskManager, TaskOptions};
