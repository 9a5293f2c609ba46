//! Caller-side handle to a submitted task.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::tasks::error::TaskError;
use crate::tasks::record::TaskId;

/// Resolves to the task's result. Dropping the handle detaches; the task
/// keeps running under the manager.
#[derive(Debug)]
pub struct TaskHandle<T, E> {
    id: TaskId,
    join: JoinHandle<Result<T, TaskError<E>>>,
    cancel: CancellationToken,
}

impl<T, E> TaskHandle<T, E> {
    pub(crate) fn new(
        id: TaskId,
        join: JoinHandle<Result<T, TaskError<E>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { id, join, cancel }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Request cooperative cancellation. The handle then resolves to
    /// [`TaskError::Cancelled`] unless the task already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the task when dropped unless disarmed. Useful when the
    /// awaiting future may itself be abandoned, e.g. by an outer timeout.
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.join).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(TaskError::Cancelled)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(TaskError::Panicked(e.to_string()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
