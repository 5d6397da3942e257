//! Event types for Harbor observability
//!
//! Every component publishes onto its own broadcast channel using the same
//! envelope, so a single consumer can merge the streams.

use crate::{
    ActionId, HealthState, InstanceId, Phase, ServiceId, ServiceStatus, ServiceType,
    UpdateStrategy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all Harbor events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarborEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event source
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// The actual event
    pub event: HarborEvent,
}

impl HarborEventEnvelope {
    pub fn new(source: EventSource, event: HarborEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source,
            severity: event.severity(),
            event,
        }
    }
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Service catalog
    Registry,
    /// Lifecycle manager
    Lifecycle,
    /// Deferred action scheduler
    Scheduler,
    /// Transport layer
    Transport,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Harbor events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HarborEvent {
    // ═══════════════════════════════════════════════════════════════════
    // REGISTRY EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Service stored in the catalog
    ServiceRegistered {
        service_id: ServiceId,
        name: String,
        version: String,
        service_type: ServiceType,
    },

    /// Service cleanup finished, record is now a tombstone
    ServiceUnregistered {
        service_id: ServiceId,
    },

    /// Catalog status changed
    ServiceStatusChanged {
        service_id: ServiceId,
        from: ServiceStatus,
        to: ServiceStatus,
    },

    /// Configuration merged
    ServiceConfigurationUpdated {
        service_id: ServiceId,
    },

    /// Metadata merged
    ServiceMetadataUpdated {
        service_id: ServiceId,
        version: String,
    },

    /// Health check completed
    HealthCheckCompleted {
        service_id: ServiceId,
        previous: HealthState,
        current: HealthState,
        response_time_ms: Option<u64>,
    },

    /// Registration evicted after its explicit expiry
    ServiceExpired {
        service_id: ServiceId,
    },

    /// Inactive tombstone evicted after the retention window
    ServiceEvicted {
        service_id: ServiceId,
    },

    // ═══════════════════════════════════════════════════════════════════
    // LIFECYCLE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Phase transition
    PhaseChanged {
        service_id: ServiceId,
        from: Option<Phase>,
        to: Phase,
        error: Option<String>,
    },

    /// Instance launched
    InstanceCreated {
        service_id: ServiceId,
        instance_id: InstanceId,
        version: String,
        instance_count: usize,
    },

    /// Instance removed from the pool
    InstanceTerminated {
        service_id: ServiceId,
        instance_id: InstanceId,
        instance_count: usize,
    },

    /// Explicit scale completed
    ServiceScaled {
        service_id: ServiceId,
        from: usize,
        to: usize,
    },

    /// Update completed
    ServiceUpdated {
        service_id: ServiceId,
        strategy: UpdateStrategy,
        from_version: String,
        to_version: String,
    },

    /// Update aborted
    UpdateFailed {
        service_id: ServiceId,
        strategy: UpdateStrategy,
        reason: String,
    },

    /// Recreate rollback to the prior registration began
    RollbackStarted {
        service_id: ServiceId,
        to_version: String,
    },

    /// Rollback finished
    RollbackCompleted {
        service_id: ServiceId,
        to_version: String,
        success: bool,
    },

    /// Unhealthy instance replaced by auto-healing
    InstanceReplaced {
        service_id: ServiceId,
        old_instance_id: InstanceId,
        new_instance_id: InstanceId,
    },

    /// Auto-healing could not replace an instance this tick
    InstanceReplacementFailed {
        service_id: ServiceId,
        instance_id: InstanceId,
        reason: String,
    },

    /// Auto-scaler changed the instance count
    AutoScaled {
        service_id: ServiceId,
        from: usize,
        to: usize,
        cpu_percent: f64,
        memory_percent: f64,
    },

    // ═══════════════════════════════════════════════════════════════════
    // SCHEDULER EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Deferred action accepted
    ActionScheduled {
        action_id: ActionId,
        service_id: ServiceId,
        action: String,
        at: DateTime<Utc>,
    },

    /// Deferred action ran successfully
    ActionExecuted {
        action_id: ActionId,
        service_id: ServiceId,
    },

    /// Deferred action ran and failed
    ActionFailed {
        action_id: ActionId,
        service_id: ServiceId,
        reason: String,
    },

    /// Deferred action cancelled before it ran
    ActionCancelled {
        action_id: ActionId,
        service_id: ServiceId,
    },

    // ═══════════════════════════════════════════════════════════════════
    // TRANSPORT EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Backend connected
    TransportConnected {
        url: String,
    },

    /// Backend disconnected
    TransportDisconnected {
        url: String,
    },

    /// Backend entered the error state
    TransportFailed {
        url: String,
        reason: String,
    },

    /// Active backend pointer moved
    ActiveTransportChanged {
        from: Option<String>,
        to: Option<String>,
    },

    /// Send on the active backend failed, trying others
    FailoverStarted {
        from: String,
        reason: String,
    },

    /// Another backend delivered and became active
    FailoverSucceeded {
        from: String,
        to: String,
    },

    /// No backend could deliver
    FailoverExhausted {
        from: String,
        attempted: usize,
    },
}

impl HarborEvent {
    /// Service the event concerns, if any
    pub fn service_id(&self) -> Option<ServiceId> {
        use HarborEvent::*;
        match self {
            ServiceRegistered { service_id, .. }
            | ServiceUnregistered { service_id }
            | ServiceStatusChanged { service_id, .. }
            | ServiceConfigurationUpdated { service_id }
            | ServiceMetadataUpdated { service_id, .. }
            | HealthCheckCompleted { service_id, .. }
            | ServiceExpired { service_id }
            | ServiceEvicted { service_id }
            | PhaseChanged { service_id, .. }
            | InstanceCreated { service_id, .. }
            | InstanceTerminated { service_id, .. }
            | ServiceScaled { service_id, .. }
            | ServiceUpdated { service_id, .. }
            | UpdateFailed { service_id, .. }
            | RollbackStarted { service_id, .. }
            | RollbackCompleted { service_id, .. }
            | InstanceReplaced { service_id, .. }
            | InstanceReplacementFailed { service_id, .. }
            | AutoScaled { service_id, .. }
            | ActionScheduled { service_id, .. }
            | ActionExecuted { service_id, .. }
            | ActionFailed { service_id, .. }
            | ActionCancelled { service_id, .. } => Some(*service_id),
            TransportConnected { .. }
            | TransportDisconnected { .. }
            | TransportFailed { .. }
            | ActiveTransportChanged { .. }
            | FailoverStarted { .. }
            | FailoverSucceeded { .. }
            | FailoverExhausted { .. } => None,
        }
    }

    pub fn severity(&self) -> EventSeverity {
        use HarborEvent::*;
        match self {
            HealthCheckCompleted { current, .. } => match current {
                HealthState::Unhealthy => EventSeverity::Warning,
                _ => EventSeverity::Debug,
            },
            PhaseChanged { to: Phase::Error, .. } => EventSeverity::Error,
            RollbackCompleted { success: false, .. } => EventSeverity::Critical,
            UpdateFailed { .. } | FailoverExhausted { .. } | ActionFailed { .. } => {
                EventSeverity::Error
            }
            InstanceReplacementFailed { .. }
            | TransportFailed { .. }
            | FailoverStarted { .. }
            | RollbackStarted { .. }
            | ServiceExpired { .. } => EventSeverity::Warning,
            _ => EventSeverity::Info,
        }
    }
}
