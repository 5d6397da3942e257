//! In-process loopback backend
//!
//! Delivered messages land on an unbounded channel that a consumer can take
//! with [`MemoryTransport::take_receiver`]. Faults can be injected to
//! exercise failover.

use crate::config::TransportKind;
use crate::error::{Result, TransportError};
use crate::message::Message;
use crate::transport::{BackendState, Transport, TransportStatistics, TransportStatus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// In-process backend delivering messages to a channel
///
/// Failure injection switches make it usable as a test double.
pub struct MemoryTransport {
    url: String,
    state: BackendState,
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    in_flight: AtomicUsize,
    latency: Mutex<Duration>,
    fail_sends: AtomicBool,
    fail_next: AtomicU32,
    fail_connect: AtomicBool,
    broken: AtomicBool,
}

impl MemoryTransport {
    /// Create a disconnected backend with an open channel
    pub fn new(url: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            state: BackendState::new(),
            tx,
            rx: Mutex::new(Some(rx)),
            in_flight: AtomicUsize::new(0),
            latency: Mutex::new(Duration::ZERO),
            fail_sends: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            fail_connect: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        }
    }

    /// Receiving end of the loopback channel; available once
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Fail every send until cleared
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` sends
    pub fn fail_next_sends(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Make `connect` fail until cleared
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Simulate a lost connection; the next health check reports `Error`
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    /// Delay every send by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    fn injected_failure(&self) -> bool {
        if self.fail_sends.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn url(&self) -> &str {
        &self.url
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn status(&self) -> TransportStatus {
        self.state.status()
    }

    fn active_connections(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn statistics(&self) -> TransportStatistics {
        self.state.stats()
    }

    async fn connect(&self) -> Result<()> {
        self.state.set_status(TransportStatus::Connecting);
        if self.fail_connect.load(Ordering::SeqCst) {
            self.state.set_status(TransportStatus::Error);
            self.state.update_stats(|s| s.record_error("connect refused"));
            return Err(TransportError::ConnectFailed {
                url: self.url.clone(),
                reason: "connect refused".into(),
            });
        }
        self.broken.store(false, Ordering::SeqCst);
        self.state.set_status(TransportStatus::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.set_status(TransportStatus::Disconnected);
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<()> {
        if self.state.status() != TransportStatus::Connected {
            return Err(TransportError::NotConnected {
                url: self.url.clone(),
            });
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = if self.injected_failure() {
            Err("injected send failure".to_string())
        } else {
            self.tx
                .send(message.clone())
                .map_err(|_| "loopback receiver dropped".to_string())
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(()) => {
                let bytes = message.encoded_len();
                self.state.update_stats(|s| {
                    s.record_send(bytes, started.elapsed());
                    s.record_receive(bytes);
                });
                Ok(())
            }
            Err(reason) => {
                self.state.update_stats(|s| s.record_error(reason.clone()));
                Err(TransportError::SendFailed {
                    url: self.url.clone(),
                    reason,
                })
            }
        }
    }

    async fn health_check(&self) -> TransportStatus {
        let status = self.state.status();
        if status == TransportStatus::Connected && self.broken.load(Ordering::SeqCst) {
            self.state.set_status(TransportStatus::Error);
            self.state.update_stats(|s| s.record_error("connection lost"));
            return TransportStatus::Error;
        }
        if status == TransportStatus::Error && !self.broken.load(Ordering::SeqCst) {
            self.state.set_status(TransportStatus::Connected);
            return TransportStatus::Connected;
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_delivery() {
        let transport = MemoryTransport::new("memory://a");
        let mut rx = transport.take_receiver().unwrap();
        transport.connect().await.unwrap();

        let message = Message::request("ping", serde_json::json!({"n": 1}));
        transport.send(&message).await.unwrap();

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.id, message.id);
        assert_eq!(transport.statistics().messages_sent, 1);
    }

    #[tokio::test]
    async fn test_fail_next_sends() {
        let transport = MemoryTransport::new("memory://a");
        transport.connect().await.unwrap();
        transport.fail_next_sends(1);

        let message = Message::request("ping", serde_json::Value::Null);
        assert!(transport.send(&message).await.is_err());
        assert!(transport.send(&message).await.is_ok());
        assert_eq!(transport.statistics().errors, 1);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let transport = MemoryTransport::new("memory://a");
        let message = Message::request("ping", serde_json::Value::Null);
        assert!(matches!(
            transport.send(&message).await,
            Err(TransportError::NotConnected { .. })
        ));
    }
}
