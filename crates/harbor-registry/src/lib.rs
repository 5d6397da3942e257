//! Harbor Registry - In-memory service catalog
//!
//! This crate provides the service registry of the Harbor control plane:
//!
//! - **ServiceRegistry**: registration, status transitions, partial updates
//! - **RegistryIndex**: status/type buckets with a consistency validator
//! - **HealthProbe**: reachability checks against registration endpoints
//! - **Search**: filtered, sorted, paginated snapshots of the catalog
//!
//! Health and cleanup sweeps run as cancellable background tasks started
//! with [`ServiceRegistry::start`] and stopped with [`ServiceRegistry::shutdown`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

/// Registry settings
pub mod config;
/// Registry errors
pub mod error;
/// Registration lifecycle callbacks
pub mod hooks;
/// Secondary indexes by status and type
pub mod index;
/// Endpoint reachability probes
pub mod probe;
/// The service catalog
pub mod registry;
/// Filtering, sorting and pagination
pub mod search;
/// Catalog-wide statistics
pub mod stats;

// Re-exports
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use hooks::{NoopHooks, RegistryHooks};
pub use index::{IndexViolation, RegistryIndex};
pub use probe::{probe_endpoints, HealthProbe, HttpProbe, ProbeOutcome, StaticProbe, TcpProbe};
pub use registry::{CleanupReport, ServiceRegistry};
pub use search::{SearchFilter, SearchOptions, SearchResult, SortField, SortOrder};
pub use stats::RegistryStatistics;
