//! Admin and health HTTP surface.
//!
//! # Routes
//! - `GET /health/circuit-breakers`, `GET /health/tasks`: open, 503 when unhealthy
//! - `/admin/*`: bearer token from `[admin].api_key`
//!
//! Breaker lookups never create breakers; unknown names are 404.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::context::ResilienceContext;

#[derive(Clone)]
pub struct AdminState {
    context: ResilienceContext,
    api_key: Arc<str>,
}

impl AdminState {
    pub fn new(context: ResilienceContext, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            context,
            api_key: api_key.into(),
        }
    }

    pub fn context(&self) -> &ResilienceContext {
        &self.context
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    let admin = Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(list_breakers))
        .route("/admin/breakers/reset", post(reset_all_breakers))
        .route("/admin/breakers/{name}", get(get_breaker))
        .route("/admin/breakers/{name}/reset", post(reset_breaker))
        .route("/admin/breakers/{name}/force-open", post(force_open_breaker))
        .route("/admin/tasks", get(list_tasks))
        .route("/admin/tasks/groups/{group}/cancel", post(cancel_group))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health/circuit-breakers", get(breaker_health))
        .route("/health/tasks", get(task_health))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
