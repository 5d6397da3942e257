//! Harbor Transport - Failure-aware message delivery
//!
//! The transport layer owns a set of backends and routes every outgoing
//! message through one *active* backend chosen by a load-balancing policy.
//! When a send fails, every other connected backend is tried in turn and
//! the first one that delivers becomes active.
//!
//! ## Backends
//!
//! - [`MemoryTransport`]: in-process loopback with fault injection
//! - [`HttpTransport`]: JSON POST over HTTP
//!
//! Additional backends implement [`Transport`] and are built by a
//! [`TransportFactory`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

/// Built-in backends
pub mod backends;
/// Backend selection
pub mod balancer;
/// Backend and layer settings
pub mod config;
/// Transport errors
pub mod error;
/// Multi-backend routing with failover
pub mod layer;
/// Outgoing messages
pub mod message;
/// The backend trait and its counters
pub mod transport;

// Re-exports
pub use backends::{DefaultTransportFactory, HttpTransport, MemoryTransport};
pub use balancer::{Candidate, LoadBalancer, LoadBalancingStrategy};
pub use config::{TransportConfig, TransportKind, TransportLayerConfig};
pub use error::{Result, TransportError};
pub use layer::{BackendStatistics, BatchFailure, BatchOutcome, LayerStatistics, TransportLayer};
pub use message::{Message, MessageKind};
pub use transport::{Transport, TransportFactory, TransportStatistics, TransportStatus};
