//! Error taxonomy shared by every Harbor component.
//!
//! Each crate keeps its own error enum; `ErrorKind` is the common
//! classification automation branches on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failed control-plane operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed registration, configuration or request; rejected before mutation
    Validation,
    /// Unknown service, instance, action or transport
    NotFound,
    /// Catalog or instance bounds exceeded
    Capacity,
    /// Health convergence, grace period or stabilization window exceeded
    Timeout,
    /// Every transport backend failed to deliver
    Transport,
    /// Concurrent or out-of-order lifecycle operation on the same service
    StateConflict,
    /// Operation was cancelled before completion
    Cancelled,
    /// Unexpected internal failure
    Internal,
}

impl ErrorKind {
    /// Whether automation may retry the operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Transport | ErrorKind::StateConflict
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}
