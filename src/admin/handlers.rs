use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::resilience::circuit_breaker::BreakerStats;
use crate::tasks::record::TaskInfo;

/// How long admin-initiated cancellations wait for acknowledgement.
const ADMIN_CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub breakers: usize,
    pub open_breakers: usize,
    pub active_tasks: usize,
    pub accepting_tasks: bool,
}

#[derive(Serialize)]
pub struct ResetSummary {
    pub reset: usize,
}

#[derive(Serialize)]
pub struct CancelSummary {
    pub group: String,
    pub cancelled: usize,
}

#[derive(Debug, Deserialize)]
pub struct TaskFilter {
    pub group: Option<String>,
}

fn status_for(healthy: bool) -> StatusCode {
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

fn breaker_not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("no circuit breaker named '{}'", name) })),
    )
        .into_response()
}

pub async fn breaker_health(State(state): State<AdminState>) -> Response {
    let report = state.context().registry().aggregate_health();
    (status_for(report.overall_healthy), Json(report)).into_response()
}

pub async fn task_health(State(state): State<AdminState>) -> Response {
    let report = state.context().tasks().health_report();
    (status_for(report.healthy), Json(report)).into_response()
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let registry = state.context().registry();
    let tasks = state.context().tasks();
    let breakers = registry.aggregate_stats();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        breakers: breakers.len(),
        open_breakers: breakers
            .values()
            .filter(|stats| stats.state != crate::resilience::CircuitState::Closed)
            .count(),
        active_tasks: tasks.len(),
        accepting_tasks: tasks.is_accepting(),
    })
}

pub async fn list_breakers(State(state): State<AdminState>) -> Json<BTreeMap<String, BreakerStats>> {
    Json(state.context().registry().aggregate_stats())
}

pub async fn get_breaker(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.context().registry().get(&name) {
        Some(breaker) => Json(breaker.stats()).into_response(),
        None => breaker_not_found(&name),
    }
}

pub async fn reset_all_breakers(State(state): State<AdminState>) -> Json<ResetSummary> {
    let registry = state.context().registry();
    registry.reset_all();
    tracing::warn!("All circuit breakers reset via admin API");
    Json(ResetSummary {
        reset: registry.len(),
    })
}

pub async fn reset_breaker(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.context().registry().get(&name) {
        Some(breaker) => {
            breaker.reset();
            tracing::warn!(breaker = %name, "Circuit breaker reset via admin API");
            Json(breaker.stats()).into_response()
        }
        None => breaker_not_found(&name),
    }
}

pub async fn force_open_breaker(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.context().registry().get(&name) {
        Some(breaker) => {
            breaker.force_open();
            tracing::warn!(breaker = %name, "Circuit breaker forced open via admin API");
            Json(breaker.stats()).into_response()
        }
        None => breaker_not_found(&name),
    }
}

pub async fn list_tasks(
    State(state): State<AdminState>,
    Query(filter): Query<TaskFilter>,
) -> Json<Vec<TaskInfo>> {
    Json(state.context().tasks().list_tasks(filter.group.as_deref()))
}

pub async fn cancel_group(
    State(state): State<AdminState>,
    Path(group): Path<String>,
) -> Json<CancelSummary> {
    let cancelled = state
        .context()
        .tasks()
        .cancel_group(&group, ADMIN_CANCEL_TIMEOUT)
        .await;
    tracing::warn!(group = %group, cancelled, "Task group cancelled via admin API");
    Json(CancelSummary { group, cancelled })
}
