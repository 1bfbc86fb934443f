//! swcache HTTP surface
//!
//! This crate exposes the interception layer over Axum: intercepted
//! requests, page-context event streams, control messages, health and metrics.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
