//! The backend abstraction

use crate::config::{TransportConfig, TransportKind};
use crate::error::Result;
use crate::message::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Connection state of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    /// Not connected
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Ready to send
    Connected,
    /// Re-establishing a lost connection
    Reconnecting,
    /// Last connect or health check failed
    Error,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportStatus::Disconnected => "disconnected",
            TransportStatus::Connecting => "connecting",
            TransportStatus::Connected => "connected",
            TransportStatus::Reconnecting => "reconnecting",
            TransportStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Cumulative counters of one backend
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportStatistics {
    /// Messages delivered
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Encoded bytes delivered
    pub bytes_sent: u64,
    /// Encoded bytes received
    pub bytes_received: u64,
    /// Running mean send latency in milliseconds
    pub average_latency_ms: f64,
    /// Failed operations
    pub errors: u64,
    /// Most recent failure
    pub last_error: Option<String>,
    /// Start of the current connection
    pub connected_since: Option<DateTime<Utc>>,
}

impl TransportStatistics {
    /// Count a delivered message and fold its latency into the mean
    pub fn record_send(&mut self, bytes: usize, latency: Duration) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.average_latency_ms +=
            (latency_ms - self.average_latency_ms) / self.messages_sent as f64;
    }

    /// Count a received message
    pub fn record_receive(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// Count a failure and keep its reason
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors += 1;
        self.last_error = Some(error.into());
    }
}

/// A connection to one concrete transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address identifying the backend inside the layer
    fn url(&self) -> &str;

    fn kind(&self) -> TransportKind;

    fn status(&self) -> TransportStatus;

    /// Sends currently in flight, used by least-connections balancing
    fn active_connections(&self) -> usize;

    fn statistics(&self) -> TransportStatistics;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn send(&self, message: &Message) -> Result<()>;

    /// Re-evaluate connectivity and return the resulting status
    async fn health_check(&self) -> TransportStatus;
}

/// Builds backends from configuration
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>>;
}

/// Status and counters shared by the built-in backends
#[derive(Debug)]
pub(crate) struct BackendState {
    status: Mutex<TransportStatus>,
    stats: Mutex<TransportStatistics>,
}

impl BackendState {
    pub(crate) fn new() -> Self {
        Self {
            status: Mutex::new(TransportStatus::Disconnected),
            stats: Mutex::new(TransportStatistics::default()),
        }
    }

    pub(crate) fn status(&self) -> TransportStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_status(&self, status: TransportStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
        if status == TransportStatus::Connected {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.connected_since.get_or_insert_with(Utc::now);
        } else if status == TransportStatus::Disconnected {
            self.stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .connected_since = None;
        }
    }

    pub(crate) fn stats(&self) -> TransportStatistics {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn update_stats(&self, f: impl FnOnce(&mut TransportStatistics)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *stats);
    }
}
