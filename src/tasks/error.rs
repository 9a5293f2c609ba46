//! Errors surfaced to task submitters.

use thiserror::Error;

use crate::resilience::circuit_breaker::Verdict;

/// Why a submitted task produced no value.
///
/// `E` is the operation's own error type, passed through untouched in
/// [`TaskError::Failed`].
#[derive(Debug, Error)]
pub enum TaskError<E> {
    #[error("task capacity exhausted ({capacity} tasks tracked)")]
    ResourceExhausted { capacity: usize },

    #[error("task manager is not accepting work")]
    ShuttingDown,

    #[error("task was cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Failed(E),
}

impl<E> TaskError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, TaskError::ResourceExhausted { .. })
    }

    pub fn failed(&self) -> Option<&E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// How a breaker wrapping the submission should count this error.
    ///
    /// Cancellation and local rejection say nothing about the remote target.
    pub fn verdict(&self) -> Verdict {
        match self {
            TaskError::Cancelled | TaskError::ResourceExhausted { .. } | TaskError::ShuttingDown => {
                Verdict::Neutral
            }
            TaskError::Panicked(_) | TaskError::Failed(_) => Verdict::Failure,
        }
    }
}
