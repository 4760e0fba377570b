//! Client error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Key fetch for epoch {epoch} timed out after {timeout_ms} ms")]
    Timeout { epoch: String, timeout_ms: u64 },

    #[error("Key material unavailable for epoch {epoch}: {reason}")]
    KeyUnavailable { epoch: String, reason: String },

    #[error("Core error: {0}")]
    Core(#[from] prt_core::Error),
}

impl ClientError {
    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Http(_) => "http",
            ClientError::Json(_) => "json",
            ClientError::Server { .. } => "server",
            ClientError::Timeout { .. } => "timeout",
            ClientError::KeyUnavailable { .. } => "unavailable",
            ClientError::Core(_) => "invalid_document",
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
