//! Pipeline and server error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use prt_client::ClientError;
use prt_core::Error as CoreError;

/// Why a single token left the pipeline early
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Decode failed: {0}")]
    Decode(#[source] CoreError),

    #[error("Key material unavailable for epoch {epoch}: {source}")]
    KeyUnavailable {
        epoch: String,
        #[source]
        source: ClientError,
    },

    #[error("Decrypt failed: {0}")]
    Decrypt(#[source] CoreError),

    #[error("Extract failed: {0}")]
    Extract(#[source] CoreError),
}

impl PipelineError {
    /// Stable machine-readable failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::KeyUnavailable { .. } => "key_unavailable",
            PipelineError::Decode(e) | PipelineError::Decrypt(e) | PipelineError::Extract(e) => {
                match e {
                    CoreError::InvalidBase64(_) => "invalid_base64",
                    CoreError::InvalidLength { .. } => "invalid_length",
                    CoreError::InvalidPointSize { .. } => "invalid_point_size",
                    CoreError::PointDecodeFailure { .. } => "point_decode_failure",
                    CoreError::PayloadTooShort { .. } => "payload_too_short",
                    CoreError::InvalidKeyMaterial(_) => "key_unavailable",
                }
            }
        }
    }

    /// Pipeline stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => "decode",
            PipelineError::KeyUnavailable { .. } => "key",
            PipelineError::Decrypt(_) => "decrypt",
            PipelineError::Extract(_) => "extract",
        }
    }
}

/// Structured error response for API clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Tab {0} is not tracked")]
    TabNotTracked(u64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Metrics are disabled")]
    MetricsDisabled,
}

impl ServerError {
    fn code(&self) -> &'static str {
        match self {
            ServerError::TabNotTracked(_) => "TAB_NOT_TRACKED",
            ServerError::InvalidRequest(_) => "INVALID_REQUEST",
            ServerError::Pipeline(e) => match e.kind() {
                "invalid_base64" => "INVALID_BASE64",
                "invalid_length" => "INVALID_LENGTH",
                "invalid_point_size" => "INVALID_POINT_SIZE",
                "point_decode_failure" => "POINT_DECODE_FAILURE",
                "payload_too_short" => "PAYLOAD_TOO_SHORT",
                _ => "KEY_UNAVAILABLE",
            },
            ServerError::MetricsDisabled => "METRICS_DISABLED",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServerError::TabNotTracked(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Pipeline(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::MetricsDisabled => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use prt_core::PointField;

    #[test]
    fn test_pipeline_kinds() {
        let err = PipelineError::Decode(CoreError::InvalidLength {
            expected: 79,
            actual: 3,
        });
        assert_eq!(err.kind(), "invalid_length");
        assert_eq!(err.stage(), "decode");

        let err = PipelineError::Decrypt(CoreError::PointDecodeFailure { field: PointField::E });
        assert_eq!(err.kind(), "point_decode_failure");

        let err = PipelineError::KeyUnavailable {
            epoch: "AAECAwQFBgc".into(),
            source: ClientError::Server {
                status: 404,
                message: String::new(),
            },
        };
        assert_eq!(err.kind(), "key_unavailable");
        assert_eq!(err.stage(), "key");
    }

    #[test]
    fn test_server_error_status() {
        let err = ServerError::from(PipelineError::Extract(CoreError::PayloadTooShort {
            actual: 3,
        }));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "PAYLOAD_TOO_SHORT");
        assert_eq!(ServerError::TabNotTracked(4).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_shared_fetch_failure_maps_to_key_unavailable() {
        let err = ServerError::from(PipelineError::KeyUnavailable {
            epoch: "AAECAwQFBgc".into(),
            source: ClientError::KeyUnavailable {
                epoch: "AAECAwQFBgc".into(),
                reason: "Server error 404: ".into(),
            },
        });
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "KEY_UNAVAILABLE");
    }
}
