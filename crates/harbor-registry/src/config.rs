//! Registry configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum number of live (non-tombstoned) registrations
    #[serde(default = "default_max_services")]
    pub max_services: usize,

    /// Interval of the health sweep over active services
    #[serde(default = "default_health_interval", with = "harbor_types::duration_serde")]
    pub health_check_interval: Duration,

    /// Interval of the expiry/retention sweep
    #[serde(default = "default_cleanup_interval", with = "harbor_types::duration_serde")]
    pub cleanup_interval: Duration,

    /// How long an unregistered tombstone stays queryable
    #[serde(default = "default_retention", with = "harbor_types::duration_serde")]
    pub inactive_retention: Duration,

    /// Error rate above which a reachable service is reported degraded
    #[serde(default = "default_degraded_error_rate")]
    pub degraded_error_rate: f64,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_services() -> usize {
    10_000
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_degraded_error_rate() -> f64 {
    0.1
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_services: default_max_services(),
            health_check_interval: default_health_interval(),
            cleanup_interval: default_cleanup_interval(),
            inactive_retention: default_retention(),
            degraded_error_rate: default_degraded_error_rate(),
            event_buffer: default_event_buffer(),
        }
    }
}
