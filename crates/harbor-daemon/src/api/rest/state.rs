//! Application state for API handlers

use harbor_lifecycle::LifecycleManager;
use harbor_registry::ServiceRegistry;
use harbor_transport::TransportLayer;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Service catalog
    pub registry: Arc<ServiceRegistry>,

    /// Lifecycle manager
    pub lifecycle: Arc<LifecycleManager>,

    /// Transport layer
    pub transport: Arc<TransportLayer>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        lifecycle: Arc<LifecycleManager>,
        transport: Arc<TransportLayer>,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            transport,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
