//! Shared handle to the breaker registry and the task manager.
//!
//! # Data Flow
//! ```text
//! context.run("stt", future, options)
//!     → registry (breaker "stt")
//!     → breaker admits or rejects
//!     → tasks.submit(future) → await handle, under the breaker's call_timeout
//!     → verdict: cancellation and local rejection are neutral
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::config::ResilienceConfig;
use crate::resilience::error::CallError;
use crate::resilience::registry::CircuitBreakerRegistry;
use crate::tasks::error::TaskError;
use crate::tasks::manager::TaskManager;
use crate::tasks::record::TaskOptions;

/// Owns one registry and one task manager. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ResilienceContext {
    registry: Arc<CircuitBreakerRegistry>,
    tasks: TaskManager,
}

impl ResilienceContext {
    pub fn new(registry: Arc<CircuitBreakerRegistry>, tasks: TaskManager) -> Self {
        Self { registry, tasks }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(
            Arc::new(CircuitBreakerRegistry::from_config(config)),
            TaskManager::new(config.tasks.clone()),
        )
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Run `operation` as a tracked task behind the breaker named `breaker`.
    ///
    /// If the breaker's call timeout fires first, the task is cancelled too.
    pub async fn run<Fut, T, E>(
        &self,
        breaker: &str,
        operation: Fut,
        options: TaskOptions,
    ) -> Result<T, CallError<TaskError<E>>>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let breaker = self.registry.get_or_create(breaker, None);
        let tasks = &self.tasks;

        breaker
            .call_classified(
                || async move {
                    let handle = tasks.submit(operation, options).await?;
                    let guard = handle.cancel_on_drop();
                    let result = handle.await;
                    guard.disarm();
                    result
                },
                None,
                TaskError::verdict,
            )
            .await
    }
}
