//! Prometheus exposition of the interception counters
//!
//! Counters recorded by the worker: `swcache_cache_hits_total` and
//! `swcache_cache_misses_total` (labelled by strategy),
//! `swcache_network_failures_total`, `swcache_evictions_total` (labelled by
//! partition slug) and `swcache_health_checks_total`.

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use std::sync::Arc;

use crate::state::MetricsHandle;

/// Prometheus text exposition format
const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Routes serving the recorder behind `handle`
pub fn routes(handle: Arc<MetricsHandle>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(handle)
}

async fn render_metrics(State(handle): State<Arc<MetricsHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        handle.render(),
    )
}
