//! Transport layer configuration

use crate::balancer::LoadBalancingStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backend implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process loopback
    Memory,
    /// JSON over HTTP
    Http,
}

/// Configuration of one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Backend address; unique inside a layer
    pub url: String,

    /// Backend implementation
    pub kind: TransportKind,

    /// Relative share under weighted balancing
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Upper bound on establishing the connection
    #[serde(default = "default_connect_timeout", with = "harbor_types::duration_serde")]
    pub connect_timeout: Duration,

    /// Upper bound on a single send
    #[serde(default = "default_request_timeout", with = "harbor_types::duration_serde")]
    pub request_timeout: Duration,
}

fn default_weight() -> u32 {
    1
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl TransportConfig {
    /// Backend config with default weight and timeouts
    pub fn new(url: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            url: url.into(),
            kind,
            weight: default_weight(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
        }
    }

    /// In-process backend
    pub fn memory(url: impl Into<String>) -> Self {
        Self::new(url, TransportKind::Memory)
    }

    /// HTTP backend
    pub fn http(url: impl Into<String>) -> Self {
        Self::new(url, TransportKind::Http)
    }

    /// Set the weighted-balancing share
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// Transport layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportLayerConfig {
    /// Backend selection strategy
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,

    /// Interval of the backend connectivity check
    #[serde(default = "default_health_interval", with = "harbor_types::duration_serde")]
    pub health_check_interval: Duration,

    /// Retry a failed send on the other connected backends
    #[serde(default = "default_failover")]
    pub failover: bool,

    /// Backends created on construction
    #[serde(default)]
    pub transports: Vec<TransportConfig>,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_failover() -> bool {
    true
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for TransportLayerConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::default(),
            health_check_interval: default_health_interval(),
            failover: default_failover(),
            transports: Vec::new(),
            event_buffer: default_event_buffer(),
        }
    }
}
