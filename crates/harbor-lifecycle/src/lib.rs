//! Harbor Lifecycle - Instance pools and the deployment state machine
//!
//! The lifecycle manager owns the replicas of every managed service. It
//! moves each service through its phases (initializing, starting, running,
//! scaling, updating, stopping, terminating, inactive, error), replaces
//! instances with one of four update strategies, and runs the auto-scaling
//! and auto-healing loops.
//!
//! ## Collaborators
//!
//! - `ServiceRegistry`: the catalog entry must exist before a service can be
//!   managed; the manager flags it active or errored as operations finish
//! - `TransportLayer`: carries drain signals to instances before termination
//! - `InstanceDriver`: launches, checks and terminates the replicas
//!
//! Operations on one service are serialized; a second operation started
//! while one is running fails with a state conflict.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

mod automation;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod manager;
pub mod scheduler;
mod state;
pub mod strategies;

pub use config::LifecycleConfig;
pub use context::OperationContext;
pub use driver::{
    DriverError, EndpointInstanceDriver, InMemoryInstanceDriver, InstanceDriver, InstanceReport,
};
pub use error::{LifecycleError, Result};
pub use manager::{LifecycleManager, ServiceStatusReport};
pub use scheduler::{LifecycleAction, ScheduledAction};
pub use strategies::{
    create_executor, BlueGreenExecutor, CanaryExecutor, RecreateExecutor, RollingExecutor,
    UpdateExecutor, UpdateOutcome,
};
