//! Application state

use std::sync::Arc;
use swcache_core::Worker;
use swcache_proxy::Fetcher;

pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<Worker>,
    /// Used for requests the worker does not intercept
    pub network: Arc<dyn Fetcher>,
}

impl AppState {
    pub fn new(worker: Arc<Worker>, network: Arc<dyn Fetcher>) -> Self {
        Self { worker, network }
    }
}
