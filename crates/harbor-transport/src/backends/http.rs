//! JSON-over-HTTP backend
//!
//! `connect` and health checks issue a GET against the backend url; any
//! HTTP response counts as reachable. Messages are POSTed as JSON to their
//! target endpoint when it is an http(s) url, otherwise to the backend url.

use crate::config::{TransportConfig, TransportKind};
use crate::error::{Result, TransportError};
use crate::message::Message;
use crate::transport::{BackendState, Transport, TransportStatistics, TransportStatus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Backend posting JSON messages to an HTTP endpoint
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
    connect_timeout: Duration,
    request_timeout: Duration,
    state: BackendState,
    in_flight: AtomicUsize,
}

impl HttpTransport {
    /// Create a backend for an http(s) url
    pub fn new(config: &TransportConfig) -> Result<Self> {
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(TransportError::InvalidConfig(format!(
                "HTTP transport needs an http(s) url, got {}",
                config.url
            )));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            url: config.url.clone(),
            client,
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            state: BackendState::new(),
            in_flight: AtomicUsize::new(0),
        })
    }

    fn map_error(&self, error: reqwest::Error, timeout: Duration) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                url: self.url.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            TransportError::SendFailed {
                url: self.url.clone(),
                reason: error.to_string(),
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .get(&self.url)
            .timeout(self.connect_timeout)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| self.map_error(e, self.connect_timeout))
    }

    async fn post(&self, message: &Message) -> Result<usize> {
        let target = message
            .target
            .as_ref()
            .map(|endpoint| endpoint.url.as_str())
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
            .unwrap_or(self.url.as_str());
        let body = serde_json::to_vec(message)?;
        let bytes = body.len();

        let response = self
            .client
            .post(target)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::SendFailed {
                url: target.to_string(),
                reason: format!("HTTP {status}"),
            });
        }
        Ok(bytes)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn url(&self) -> &str {
        &self.url
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
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
        match self.ping().await {
            Ok(()) => {
                self.state.set_status(TransportStatus::Connected);
                Ok(())
            }
            Err(e) => {
                self.state.set_status(TransportStatus::Error);
                self.state.update_stats(|s| s.record_error(e.to_string()));
                Err(TransportError::ConnectFailed {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })
            }
        }
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
        let result = self.post(message).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(bytes) => {
                self.state
                    .update_stats(|s| s.record_send(bytes, started.elapsed()));
                Ok(())
            }
            Err(e) => {
                self.state.update_stats(|s| s.record_error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn health_check(&self) -> TransportStatus {
        let status = self.state.status();
        if !matches!(
            status,
            TransportStatus::Connected | TransportStatus::Error | TransportStatus::Reconnecting
        ) {
            return status;
        }

        let next = match self.ping().await {
            Ok(()) => TransportStatus::Connected,
            Err(e) => {
                debug!(url = %self.url, error = %e, "HTTP transport health check failed");
                self.state.update_stats(|s| s.record_error(e.to_string()));
                TransportStatus::Error
            }
        };
        self.state.set_status(next);
        next
    }
}
