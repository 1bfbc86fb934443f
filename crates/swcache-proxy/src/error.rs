//! Network error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned error: {status} - {message}")]
    UpstreamError { status: u16, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network unavailable: {0}")]
    Unavailable(String),
}

impl ProxyError {
    /// Upstream status code when the failure was a non-ok response
    pub fn status(&self) -> Option<u16> {
        match self {
            ProxyError::UpstreamError { status, .. } => Some(*status),
            ProxyError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
