//! Errors surfaced by protected calls.

use std::time::Duration;

use thiserror::Error;

/// Why a protected call did not produce a value.
///
/// `Upstream` carries the operation's own error untouched; the other variants
/// are produced by the breaker itself.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The circuit is shedding load; the operation was never invoked.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// The operation was invoked but did not finish before its deadline.
    #[error("call through circuit breaker '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error(transparent)]
    Upstream(E),
}

impl<E> CallError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }

    pub fn upstream(&self) -> Option<&E> {
        match self {
            CallError::Upstream(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_upstream(self) -> Option<E> {
        match self {
            CallError::Upstream(e) => Some(e),
            _ => None,
        }
    }
}
