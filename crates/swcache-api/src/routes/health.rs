//! Health check endpoints

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::AppState;

/// Health status response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Cache version the worker is running
    pub worker_version: String,
    pub worker_state: String,
    pub connected_pages: usize,
}

/// Health check handler
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    metrics::counter!("swcache_health_checks_total").increment(1);

    let worker_state = state.worker.state();
    Json(HealthResponse {
        status: if worker_state.can_intercept_fetch() {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        worker_version: state.worker.config().version.clone(),
        worker_state: worker_state.to_string(),
        connected_pages: state.worker.broadcaster().client_count(),
    })
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
}
