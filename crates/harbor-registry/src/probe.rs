//! Endpoint reachability probes
//!
//! The registry only needs `probe(endpoint, timeout) -> reachable | unreachable`;
//! the concrete protocol lives behind [`HealthProbe`].

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use harbor_types::Endpoint;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Result of probing one endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    /// Whether the endpoint answered
    pub reachable: bool,
    /// Time spent on the attempt, successful or not
    pub response_time: Duration,
    /// Failure reason when unreachable
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// Successful probe
    pub fn reachable(response_time: Duration) -> Self {
        Self {
            reachable: true,
            response_time,
            error: None,
        }
    }

    /// Failed probe with its reason
    pub fn unreachable(response_time: Duration, error: impl Into<String>) -> Self {
        Self {
            reachable: false,
            response_time,
            error: Some(error.into()),
        }
    }
}

/// Reachability check against a single endpoint
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe name for logging
    fn name(&self) -> &str;

    /// Check the endpoint, giving up after `timeout`
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> ProbeOutcome;
}

/// Probe every endpoint concurrently
pub async fn probe_endpoints(
    probe: &dyn HealthProbe,
    endpoints: &[Endpoint],
    timeout: Duration,
) -> Vec<ProbeOutcome> {
    join_all(endpoints.iter().map(|endpoint| probe.probe(endpoint, timeout))).await
}

/// Reachable if a TCP connection to the endpoint's host and port succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl HealthProbe for TcpProbe {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        let url = match endpoint.parse() {
            Ok(url) => url,
            Err(e) => return ProbeOutcome::unreachable(started.elapsed(), e.to_string()),
        };
        let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
            return ProbeOutcome::unreachable(started.elapsed(), "endpoint has no host or port");
        };

        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => ProbeOutcome::reachable(started.elapsed()),
            Ok(Err(e)) => ProbeOutcome::unreachable(started.elapsed(), e.to_string()),
            Err(_) => ProbeOutcome::unreachable(
                started.elapsed(),
                format!("no connection within {}ms", timeout.as_millis()),
            ),
        }
    }
}

/// Reachable if a GET on the endpoint (optionally joined with a health path)
/// returns a success status
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    path: Option<String>,
}

impl HttpProbe {
    /// Create a probe that GETs the endpoint url itself
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            path: None,
        }
    }

    /// Probe `path` joined to the endpoint url instead
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    fn target(&self, endpoint: &Endpoint) -> Result<url::Url, String> {
        let base = endpoint.parse().map_err(|e| e.to_string())?;
        match &self.path {
            Some(path) => base.join(path).map_err(|e| e.to_string()),
            None => Ok(base),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn name(&self) -> &str {
        "http"
    }

    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        let target = match self.target(endpoint) {
            Ok(target) => target,
            Err(e) => return ProbeOutcome::unreachable(started.elapsed(), e),
        };

        match self.client.get(target).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => {
                ProbeOutcome::reachable(started.elapsed())
            }
            Ok(response) => ProbeOutcome::unreachable(
                started.elapsed(),
                format!("HTTP {}", response.status()),
            ),
            Err(e) => ProbeOutcome::unreachable(started.elapsed(), e.to_string()),
        }
    }
}

/// Probe with scripted answers, for development and tests
///
/// Endpoints without an override get the default verdict.
#[derive(Debug)]
pub struct StaticProbe {
    default_reachable: bool,
    overrides: DashMap<String, bool>,
    latency: Duration,
}

impl StaticProbe {
    /// Create a probe answering `default_reachable` for unknown urls
    pub fn new(default_reachable: bool) -> Self {
        Self {
            default_reachable,
            overrides: DashMap::new(),
            latency: Duration::ZERO,
        }
    }

    /// Every endpoint answers
    pub fn reachable() -> Self {
        Self::new(true)
    }

    /// No endpoint answers
    pub fn unreachable() -> Self {
        Self::new(false)
    }

    /// Report `latency` as the response time
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Override the verdict for one url
    pub fn set_reachable(&self, url: impl Into<String>, reachable: bool) {
        self.overrides.insert(url.into(), reachable);
    }

    /// Drop the override for one url
    pub fn clear(&self, url: &str) {
        self.overrides.remove(url);
    }
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::reachable()
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    fn name(&self) -> &str {
        "static"
    }

    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> ProbeOutcome {
        if self.latency > timeout {
            tokio::time::sleep(timeout).await;
            return ProbeOutcome::unreachable(timeout, "probe timed out");
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reachable = self
            .overrides
            .get(&endpoint.url)
            .map_or(self.default_reachable, |entry| *entry.value());
        if reachable {
            ProbeOutcome::reachable(self.latency)
        } else {
            ProbeOutcome::unreachable(self.latency, "endpoint marked unreachable")
        }
    }
}
