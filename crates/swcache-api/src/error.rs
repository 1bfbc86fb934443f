//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use swcache_core::CoreError;
use swcache_proxy::ProxyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Network error: {0}")]
    Network(#[from] ProxyError),
}

fn network_status(e: &ProxyError) -> StatusCode {
    e.status()
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::BAD_GATEWAY)
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Network(e) => (network_status(e), "NETWORK_ERROR"),
            ApiError::Core(e) => match e {
                CoreError::Network(e) => (network_status(e), "NETWORK_ERROR"),
                CoreError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CACHE_ERROR"),
                CoreError::Serialization(_) => (StatusCode::BAD_REQUEST, "BAD_MESSAGE"),
                CoreError::InvalidState { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "WORKER_NOT_READY")
                }
                CoreError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        }

        let body = axum::Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
