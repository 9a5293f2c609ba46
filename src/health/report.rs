//! JSON health reports served to monitoring collaborators.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::resilience::circuit_breaker::BreakerStats;
use crate::tasks::manager::TaskManagerStats;

/// Overall verdict for the breaker registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Overall verdict for the task manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskHealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    pub healthy: bool,
    pub stats: BreakerStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryHealthReport {
    pub status: HealthStatus,
    pub circuit_breakers: BTreeMap<String, BreakerHealth>,
    pub overall_healthy: bool,
    pub total_breakers: usize,
}

impl RegistryHealthReport {
    pub fn new(circuit_breakers: BTreeMap<String, BreakerHealth>) -> Self {
        let overall_healthy = circuit_breakers.values().all(|b| b.healthy);
        Self {
            status: if overall_healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            total_breakers: circuit_breakers.len(),
            circuit_breakers,
            overall_healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskHealthReport {
    pub status: TaskHealthStatus,
    pub healthy: bool,
    pub stats: TaskManagerStats,
}

impl TaskHealthReport {
    /// Healthy while below 90% utilization with nothing stuck past the
    /// very-old threshold.
    pub fn from_stats(stats: TaskManagerStats) -> Self {
        let healthy = stats.utilization < 0.9 && stats.very_old_tasks == 0;
        Self {
            status: if healthy {
                TaskHealthStatus::Healthy
            } else {
                TaskHealthStatus::Degraded
            },
            healthy,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(active: usize, capacity: usize, very_old: usize) -> TaskManagerStats {
        TaskManagerStats {
            active_tasks: active,
            total_created: active as u64,
            total_completed: 0,
            total_cancelled: 0,
            total_failed: 0,
            task_groups: 0,
            old_tasks: very_old,
            very_old_tasks: very_old,
            utilization: active as f64 / capacity as f64,
            capacity,
            memory_utilization: None,
        }
    }

    #[test]
    fn test_task_report_thresholds() {
        assert!(TaskHealthReport::from_stats(stats(89, 100, 0)).healthy);

        let full = TaskHealthReport::from_stats(stats(90, 100, 0));
        assert!(!full.healthy);
        assert_eq!(full.status, TaskHealthStatus::Degraded);

        assert!(!TaskHealthReport::from_stats(stats(1, 100, 1)).healthy);
    }

    #[test]
    fn test_task_report_json_shape() {
        let json = serde_json::to_value(TaskHealthReport::from_stats(stats(3, 10, 0))).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["healthy"], true);
        for key in [
            "active_tasks",
            "total_created",
            "total_completed",
            "total_cancelled",
            "total_failed",
            "task_groups",
            "old_tasks",
            "very_old_tasks",
            "utilization",
        ] {
            assert!(json["stats"].get(key).is_some(), "missing stats.{}", key);
        }
    }

    #[test]
    fn test_registry_report_json_shape() {
        let json = serde_json::to_value(RegistryHealthReport::new(BTreeMap::new())).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["overall_healthy"], true);
        assert_eq!(json["total_breakers"], 0);
        assert!(json["circuit_breakers"].is_object());
    }
}
