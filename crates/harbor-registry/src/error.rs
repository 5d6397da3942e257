//! Registry error types

use harbor_types::{ErrorKind, RegistrationValidationError, ServiceId, ServiceStatus};
use thiserror::Error;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registration failed validation
    #[error("Invalid registration: {0}")]
    Validation(#[from] RegistrationValidationError),

    /// No registration with this id
    #[error("Service not found: {0}")]
    NotFound(ServiceId),

    /// The registry holds `max_services` entries
    #[error("Registry at capacity ({capacity} services)")]
    Capacity { capacity: usize },

    /// Status change not allowed from the current status
    #[error("Service {service_id} cannot move from {from} to {to}")]
    InvalidTransition {
        service_id: ServiceId,
        from: ServiceStatus,
        to: ServiceStatus,
    },

    /// A registration hook rejected the change
    #[error("Cleanup hook failed for {service_id}: {reason}")]
    Hook { service_id: ServiceId, reason: String },
}

impl RegistryError {
    /// Category of the failure, shared across crates
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Validation(_) => ErrorKind::Validation,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::Capacity { .. } => ErrorKind::Capacity,
            RegistryError::InvalidTransition { .. } => ErrorKind::StateConflict,
            RegistryError::Hook { .. } => ErrorKind::Internal,
        }
    }

    /// Service the error is about, when it names one
    pub fn service_id(&self) -> Option<ServiceId> {
        match self {
            RegistryError::NotFound(id) => Some(*id),
            RegistryError::InvalidTransition { service_id, .. }
            | RegistryError::Hook { service_id, .. } => Some(*service_id),
            RegistryError::Validation(_) | RegistryError::Capacity { .. } => None,
        }
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
