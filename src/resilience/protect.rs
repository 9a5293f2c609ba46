//! Wrap an operation once, call it through the breaker many times.

use std::future::Future;
use std::sync::Arc;

use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::error::CallError;

/// An operation bound to a breaker. Created by [`CircuitBreaker::protect`].
pub struct Protected<F> {
    breaker: Arc<CircuitBreaker>,
    operation: F,
}

impl<F> Protected<F> {
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Invoke a zero-argument operation through the breaker.
    pub async fn call<Fut, T, E>(&self) -> Result<T, CallError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker.call(|| (self.operation)()).await
    }

    /// Invoke a single-argument operation through the breaker.
    pub async fn call_with<A, Fut, T, E>(&self, arg: A) -> Result<T, CallError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker.call(|| (self.operation)(arg)).await
    }
}

impl CircuitBreaker {
    /// Bind `operation` to this breaker.
    pub fn protect<F>(self: &Arc<Self>, operation: F) -> Protected<F> {
        Protected {
            breaker: Arc::clone(self),
            operation,
        }
    }
}
