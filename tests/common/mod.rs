//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resilience_core::admin::{setup_admin_router, AdminState};
use resilience_core::config::{CircuitBreakerConfig, TaskManagerConfig};
use resilience_core::lifecycle::Shutdown;
use resilience_core::tasks::{MemoryProbe, MemoryProbeError, TaskManager};
use resilience_core::{CircuitBreaker, ResilienceContext};
use tokio::net::TcpListener;

pub const ADMIN_KEY: &str = "integration-key";

/// Memory probe pinned to a fixed utilization.
pub struct FixedMemory(pub f64);

impl MemoryProbe for FixedMemory {
    fn utilization(&self) -> Result<f64, MemoryProbeError> {
        Ok(self.0)
    }
}

pub fn breaker(failure_threshold: u32, success_threshold: u32, recovery: Duration) -> CircuitBreaker {
    CircuitBreaker::new(
        "target",
        CircuitBreakerConfig::new()
            .with_failure_threshold(failure_threshold)
            .with_success_threshold(success_threshold)
            .with_recovery_timeout(recovery),
    )
}

pub fn task_manager(capacity: usize) -> TaskManager {
    TaskManager::with_memory_probe(
        TaskManagerConfig {
            capacity,
            ..TaskManagerConfig::default()
        },
        FixedMemory(0.1),
    )
}

/// A remote target whose health can be flipped mid-test; counts invocations.
#[derive(Clone, Default)]
pub struct FlakyTarget {
    failing: Arc<std::sync::atomic::AtomicBool>,
    calls: Arc<AtomicU32>,
}

impl FlakyTarget {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn invoke(&self) -> Result<&'static str, io::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "target down"))
        } else {
            Ok("ok")
        }
    }
}

/// Serve the admin router on an ephemeral port until `shutdown` fires.
pub async fn start_admin(context: ResilienceContext, shutdown: &Shutdown) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = setup_admin_router(AdminState::new(context, ADMIN_KEY));
    let graceful = shutdown.wait();

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).with_graceful_shutdown(graceful).await;
    });
    addr
}
