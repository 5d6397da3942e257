//! Harbor Types - Core types for the service control plane
//!
//! Harbor tracks which services exist, whether they are healthy, how many
//! replicas of each should run, and how to move a service from one version
//! to another. This crate holds the data model shared by every component.
//!
//! ## Architectural Boundaries
//!
//! - `harbor-registry` owns: the service catalog, its indexes, health sweeps
//! - `harbor-lifecycle` owns: instance pools, the phase state machine, updates
//! - `harbor-transport` owns: backend selection, failover, message delivery
//!
//! ## Key Concepts
//!
//! - **ServiceRegistration**: catalog-level description of a service
//! - **ServiceInstance**: one running replica, owned by the lifecycle manager
//! - **Phase**: stage of a service in the deployment state machine
//! - **LifecycleEvent**: append-only record of a phase transition
//! - **HarborEvent**: unified observability stream across components

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod duration_serde;
pub mod error;
pub mod events;
pub mod ids;
pub mod instance;
pub mod lifecycle;
pub mod service;

// Re-export main types
pub use error::ErrorKind;
pub use events::{EventSeverity, EventSource, HarborEvent, HarborEventEnvelope};
pub use ids::{ActionId, InstanceId, ServiceId};
pub use instance::{InstanceHealth, InstancePhase, ResourceUsage, ServiceInstance};
pub use lifecycle::{
    ConfigValidationError, LifecycleEvent, Phase, ScalingConfig, UpdateConfig, UpdateStrategy,
};
pub use service::{
    ConfigurationUpdate, Endpoint, HealthState, MetadataUpdate, RegistrationValidationError,
    RetryPolicy, ServiceConfiguration, ServiceHealth, ServiceMetadata, ServiceRegistration,
    ServiceStatistics, ServiceStatus, ServiceType,
};
