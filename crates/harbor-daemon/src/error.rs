//! Error types for harbor-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use harbor_lifecycle::LifecycleError;
use harbor_registry::RegistryError;
use harbor_transport::TransportError;
use harbor_types::ErrorKind;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Transport setup error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or query
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    fn kind(&self) -> ErrorKind {
        match self {
            ApiError::BadRequest(_) => ErrorKind::Validation,
            ApiError::Registry(e) => e.kind(),
            ApiError::Lifecycle(e) => e.kind(),
        }
    }
}

fn status_for(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        ErrorKind::Capacity => (StatusCode::INSUFFICIENT_STORAGE, "CAPACITY"),
        ErrorKind::Timeout => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
        ErrorKind::Transport => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
        ErrorKind::StateConflict => (StatusCode::CONFLICT, "CONFLICT"),
        ErrorKind::Cancelled => (StatusCode::CONFLICT, "CANCELLED"),
        ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = status_for(self.kind());

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
