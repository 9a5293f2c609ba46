//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! CircuitBreakerRegistry::aggregate_health()
//!     → per-breaker stats + health_check()
//!     → RegistryHealthReport (healthy | unhealthy)
//!
//! TaskManager::health_report()
//!     → TaskManagerStats
//!     → TaskHealthReport (healthy | degraded)
//! ```
//!
//! # Design Decisions
//! - Reports are plain serializable snapshots; admin/ decides HTTP status
//! - A registry with no breakers is healthy

pub mod report;

pub use report::{HealthStatus, RegistryHealthReport, TaskHealthReport, TaskHealthStatus};
