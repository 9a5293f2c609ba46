//! Process-wide memory sampling for the reaper.

use std::sync::{Mutex, PoisonError};

use sysinfo::System;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryProbeError {
    #[error("system reported zero total memory")]
    Unavailable,
}

/// Source of the memory utilization fraction (0.0–1.0).
pub trait MemoryProbe: Send + Sync {
    fn utilization(&self) -> Result<f64, MemoryProbeError>;
}

/// Host memory via `sysinfo`.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn utilization(&self) -> Result<f64, MemoryProbeError> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(MemoryProbeError::Unavailable);
        }
        Ok((system.used_memory() as f64 / total as f64).clamp(0.0, 1.0))
    }
}
