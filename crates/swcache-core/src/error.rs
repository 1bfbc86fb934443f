//! Core error types

use thiserror::Error;

use crate::lifecycle::WorkerState;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Fetch rejected or answered with a non-ok status
    #[error("Network error: {0}")]
    Network(#[from] swcache_proxy::ProxyError),

    /// Cache store read or write rejected
    #[error("Cache operation error: {0}")]
    Storage(#[from] swcache_storage::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid worker state: expected {expected}, got {actual}")]
    InvalidState {
        expected: WorkerState,
        actual: WorkerState,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}
