//! Background task subsystem.
//!
//! # Data Flow
//! ```text
//! submit(future, options):
//!     → manager.rs (capacity check, evict oldest quarter if full)
//!     → tokio::spawn(select! { cancelled, future })
//!     → record.rs (tracked until the future reports its exit)
//!     → handle.rs (caller awaits the result)
//!
//! Reaper (reaper.rs), every cleanup_interval:
//!     → reclaim records whose task vanished
//!     → request cancellation of timed-out tasks
//!     → memory.rs sample → evict under pressure
//! ```
//!
//! # Design Decisions
//! - Cancellation is cooperative: the future is dropped at its next await
//! - Each task is finalized exactly once; the hook runs outside the lock
//! - stop() is bounded; tasks that never acknowledge are still cleared

pub mod error;
pub mod handle;
pub mod manager;
pub mod memory;
mod reaper;
pub mod record;

pub use error::TaskError;
pub use handle::TaskHandle;
pub use manager::{CompletionSummary, ReapReport, StopReport, TaskManager, TaskManagerStats};
pub use memory::{MemoryProbe, MemoryProbeError, SystemMemoryProbe};
pub use record::{CleanupHook, HookError, TaskExit, TaskId, TaskInfo, TaskOptions};
