//! Lifecycle manager configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Upper bound for instances to turn healthy during start and scale-up
    #[serde(default = "default_start_timeout", with = "harbor_types::duration_serde")]
    pub start_timeout: Duration,

    /// Wait between drain signals and termination on graceful stop
    #[serde(default = "default_grace_period", with = "harbor_types::duration_serde")]
    pub grace_period: Duration,

    #[serde(default = "default_auto_scaling_interval", with = "harbor_types::duration_serde")]
    pub auto_scaling_interval: Duration,

    #[serde(default = "default_auto_healing_interval", with = "harbor_types::duration_serde")]
    pub auto_healing_interval: Duration,

    /// Poll interval while waiting for instances to turn healthy
    #[serde(default = "default_health_poll_interval", with = "harbor_types::duration_serde")]
    pub health_poll_interval: Duration,

    /// Lifecycle events kept in history; oldest evicted first
    #[serde(default = "default_history_limit")]
    pub event_history_limit: usize,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_start_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(30)
}

fn default_auto_scaling_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_auto_healing_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_health_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_history_limit() -> usize {
    10_000
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_timeout: default_start_timeout(),
            grace_period: default_grace_period(),
            auto_scaling_interval: default_auto_scaling_interval(),
            auto_healing_interval: default_auto_healing_interval(),
            health_poll_interval: default_health_poll_interval(),
            event_history_limit: default_history_limit(),
            event_buffer: default_event_buffer(),
        }
    }
}
