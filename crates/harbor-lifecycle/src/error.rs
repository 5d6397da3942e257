//! Lifecycle error types
//!
//! Every failure names the service (or action) it concerns and, where one
//! applies, the phase the service was in when the operation failed.

use harbor_registry::RegistryError;
use harbor_transport::TransportError;
use harbor_types::{ActionId, ConfigValidationError, ErrorKind, InstanceId, Phase, ServiceId};
use thiserror::Error;

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Service not managed: {0}")]
    ServiceNotFound(ServiceId),

    #[error("Instance {instance_id} not found in {service_id}")]
    InstanceNotFound {
        service_id: ServiceId,
        instance_id: InstanceId,
    },

    #[error("Service already managed: {service_id} ({phase})")]
    AlreadyRegistered { service_id: ServiceId, phase: Phase },

    #[error("Invalid policy for {service_id}: {source}")]
    InvalidConfig {
        service_id: ServiceId,
        #[source]
        source: ConfigValidationError,
    },

    #[error("Invalid registration for {service_id}: {reason}")]
    InvalidRegistration { service_id: ServiceId, reason: String },

    #[error("Target {target} for {service_id} outside bounds [{min}, {max}]")]
    OutOfBounds {
        service_id: ServiceId,
        phase: Phase,
        target: u32,
        min: u32,
        max: u32,
    },

    #[error("Service {service_id} cannot move from {from} to {to}")]
    InvalidTransition {
        service_id: ServiceId,
        from: Phase,
        to: Phase,
    },

    #[error("Another operation is in progress on {service_id} ({phase})")]
    OperationInProgress { service_id: ServiceId, phase: Phase },

    #[error("Timed out after {timeout_ms}ms waiting for {operation} on {service_id} ({phase})")]
    Timeout {
        service_id: ServiceId,
        phase: Phase,
        operation: String,
        timeout_ms: u64,
    },

    #[error("Operation on {service_id} cancelled ({phase})")]
    Cancelled { service_id: ServiceId, phase: Phase },

    #[error("Instance operation failed for {service_id} ({phase}): {reason}")]
    Instance {
        service_id: ServiceId,
        phase: Phase,
        reason: String,
    },

    #[error("Transport failure for {service_id} ({phase}): {source}")]
    Transport {
        service_id: ServiceId,
        phase: Phase,
        #[source]
        source: TransportError,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Scheduled action not found: {0}")]
    ActionNotFound(ActionId),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::ServiceNotFound(_)
            | LifecycleError::InstanceNotFound { .. }
            | LifecycleError::ActionNotFound(_) => ErrorKind::NotFound,
            LifecycleError::InvalidConfig { .. }
            | LifecycleError::InvalidRegistration { .. }
            | LifecycleError::OutOfBounds { .. } => ErrorKind::Validation,
            LifecycleError::AlreadyRegistered { .. }
            | LifecycleError::InvalidTransition { .. }
            | LifecycleError::OperationInProgress { .. } => ErrorKind::StateConflict,
            LifecycleError::Timeout { .. } => ErrorKind::Timeout,
            LifecycleError::Cancelled { .. } => ErrorKind::Cancelled,
            LifecycleError::Instance { .. } => ErrorKind::Internal,
            LifecycleError::Transport { .. } => ErrorKind::Transport,
            LifecycleError::Registry(e) => e.kind(),
        }
    }

    pub fn service_id(&self) -> Option<ServiceId> {
        match self {
            LifecycleError::ServiceNotFound(service_id)
            | LifecycleError::InstanceNotFound { service_id, .. }
            | LifecycleError::AlreadyRegistered { service_id, .. }
            | LifecycleError::InvalidConfig { service_id, .. }
            | LifecycleError::InvalidRegistration { service_id, .. }
            | LifecycleError::OutOfBounds { service_id, .. }
            | LifecycleError::InvalidTransition { service_id, .. }
            | LifecycleError::OperationInProgress { service_id, .. }
            | LifecycleError::Timeout { service_id, .. }
            | LifecycleError::Cancelled { service_id, .. }
            | LifecycleError::Instance { service_id, .. }
            | LifecycleError::Transport { service_id, .. } => Some(*service_id),
            LifecycleError::Registry(e) => e.service_id(),
            LifecycleError::ActionNotFound(_) => None,
        }
    }

    /// Phase of the service when the operation failed
    pub fn phase(&self) -> Option<Phase> {
        match self {
            LifecycleError::AlreadyRegistered { phase, .. }
            | LifecycleError::OutOfBounds { phase, .. }
            | LifecycleError::OperationInProgress { phase, .. }
            | LifecycleError::Timeout { phase, .. }
            | LifecycleError::Cancelled { phase, .. }
            | LifecycleError::Instance { phase, .. }
            | LifecycleError::Transport { phase, .. } => Some(*phase),
            LifecycleError::InvalidTransition { from, .. } => Some(*from),
            _ => None,
        }
    }
}

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
