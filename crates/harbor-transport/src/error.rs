//! Transport error types

use harbor_types::ErrorKind;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// No backend with this url
    #[error("Transport not found: {0}")]
    NotFound(String),

    /// A backend with this url exists
    #[error("Transport already registered: {0}")]
    AlreadyExists(String),

    /// The layer has no backends
    #[error("No transports configured")]
    NoTransports,

    /// Every backend is disconnected
    #[error("No connected transport available")]
    NoConnectedTransports,

    /// Send attempted on a disconnected backend
    #[error("Transport {url} is not connected")]
    NotConnected { url: String },

    /// Connection could not be established
    #[error("Connect to {url} failed: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// Backend rejected or lost the message
    #[error("Send via {url} failed: {reason}")]
    SendFailed { url: String, reason: String },

    /// Send exceeded the request timeout
    #[error("Transport {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    /// Backend configuration is unusable
    #[error("Invalid transport config: {0}")]
    InvalidConfig(String),

    /// Message could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    /// Category of the failure, shared across crates
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::NotFound(_) => ErrorKind::NotFound,
            TransportError::AlreadyExists(_)
            | TransportError::InvalidConfig(_)
            | TransportError::Serialization(_) => ErrorKind::Validation,
            TransportError::Timeout { .. } => ErrorKind::Timeout,
            TransportError::NoTransports
            | TransportError::NoConnectedTransports
            | TransportError::NotConnected { .. }
            | TransportError::ConnectFailed { .. }
            | TransportError::SendFailed { .. } => ErrorKind::Transport,
        }
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
