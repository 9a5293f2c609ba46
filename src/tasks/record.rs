//! Per-task bookkeeping: identity, options, and the tracked record.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Terminal state of a task. Each task reaches exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskExit {
    Completed,
    Failed,
    Cancelled,
}

impl TaskExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskExit::Completed => "completed",
            TaskExit::Failed => "failed",
            TaskExit::Cancelled => "cancelled",
        }
    }
}

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Runs once when the task reaches its terminal state.
pub type CleanupHook = Box<dyn FnOnce(TaskExit) -> Result<(), HookError> + Send>;

/// Submission options. Everything is optional.
#[derive(Default)]
pub struct TaskOptions {
    pub name: Option<String>,
    pub group: Option<String>,
    /// Overrides the manager's default task timeout.
    pub timeout: Option<Duration>,
    pub cleanup_hook: Option<CleanupHook>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cleanup_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(TaskExit) -> Result<(), HookError> + Send + 'static,
    {
        self.cleanup_hook = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("timeout", &self.timeout)
            .field("cleanup_hook", &self.cleanup_hook.is_some())
            .finish()
    }
}

/// Serializable view of a tracked task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub group: Option<String>,
    pub age_secs: f64,
    pub timeout_secs: f64,
    pub cancel_requested: bool,
}

/// A tracked, not yet finalized task. Owned by the manager's task map.
pub(crate) struct TaskRecord {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) group: Option<String>,
    pub(crate) created_at: Instant,
    pub(crate) timeout: Duration,
    pub(crate) cleanup_hook: Option<CleanupHook>,
    pub(crate) cancel: CancellationToken,
    pub(crate) abort: AbortHandle,
    pub(crate) exit: watch::Sender<Option<TaskExit>>,
    pub(crate) cancel_requested: bool,
}

impl TaskRecord {
    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.age(now) > self.timeout
    }

    /// The spawned future is gone. A record that is still tracked in this
    /// state never reported its exit.
    pub(crate) fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Idempotent; returns true on the first request.
    pub(crate) fn request_cancel(&mut self) -> bool {
        self.cancel.cancel();
        !std::mem::replace(&mut self.cancel_requested, true)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<TaskExit>> {
        self.exit.subscribe()
    }

    pub(crate) fn info(&self, now: Instant) -> TaskInfo {
        TaskInfo {
            id: self.id,
            name: self.name.clone(),
            group: self.group.clone(),
            age_secs: self.age(now).as_secs_f64(),
            timeout_secs: self.timeout.as_secs_f64(),
            cancel_requested: self.cancel_requested,
        }
    }

    /// Publish the exit and run the cleanup hook. Consumes the record so
    /// neither can happen twice.
    pub(crate) fn settle(self, exit: TaskExit) {
        self.exit.send_replace(Some(exit));

        let Some(hook) = self.cleanup_hook else {
            return;
        };
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(exit))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(task_id = %self.id, task = %self.name, error = %e, "Cleanup hook failed");
            }
            Err(_) => {
                tracing::error!(task_id = %self.id, task = %self.name, "Cleanup hook panicked");
            }
        }
    }
}

/// Wait for a task's terminal state. A dropped sender without a published
/// exit only happens when the record was discarded, which counts as cancelled.
pub(crate) async fn wait_exit(mut rx: watch::Receiver<Option<TaskExit>>) -> TaskExit {
    rx.wait_for(|exit| exit.is_some())
        .await
        .ok()
        .and_then(|exit| *exit)
        .unwrap_or(TaskExit::Cancelled)
}
