//! Service registration types
//!
//! A ServiceRegistration is the catalog-level description of a service:
//! identity, metadata, configuration, reachable endpoints, plus the health
//! and usage records maintained by the registry.

use crate::ServiceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Kind of service being registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Tool,
    Resource,
    Protocol,
    Transport,
    Adapter,
    Middleware,
}

impl ServiceType {
    pub const ALL: [ServiceType; 6] = [
        ServiceType::Tool,
        ServiceType::Resource,
        ServiceType::Protocol,
        ServiceType::Transport,
        ServiceType::Adapter,
        ServiceType::Middleware,
    ];
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceType::Tool => "tool",
            ServiceType::Resource => "resource",
            ServiceType::Protocol => "protocol",
            ServiceType::Transport => "transport",
            ServiceType::Adapter => "adapter",
            ServiceType::Middleware => "middleware",
        };
        f.write_str(name)
    }
}

/// Catalog status of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Stored, initial health check pending
    Registering,
    /// Listed and routable
    Active,
    /// Still reachable but scheduled for retirement
    Deprecated,
    /// Failed health or lifecycle operation
    Error,
    /// Cleanup in progress
    Unregistering,
    /// Unregistered tombstone, evicted after the retention window
    Inactive,
}

impl ServiceStatus {
    pub const ALL: [ServiceStatus; 6] = [
        ServiceStatus::Registering,
        ServiceStatus::Active,
        ServiceStatus::Deprecated,
        ServiceStatus::Error,
        ServiceStatus::Unregistering,
        ServiceStatus::Inactive,
    ];

    /// Transitions are monotonic except for explicit reactivation of
    /// deprecated or errored services.
    pub fn can_transition_to(&self, next: ServiceStatus) -> bool {
        use ServiceStatus::*;
        matches!(
            (self, next),
            (Registering, Active)
                | (Registering, Error)
                | (Active, Deprecated)
                | (Active, Error)
                | (Active, Unregistering)
                | (Deprecated, Active)
                | (Deprecated, Error)
                | (Deprecated, Unregistering)
                | (Error, Active)
                | (Error, Unregistering)
                | (Unregistering, Inactive)
        )
    }

    /// Whether search results include this status without an explicit opt-in
    pub fn is_listed_by_default(&self) -> bool {
        !matches!(self, ServiceStatus::Inactive | ServiceStatus::Deprecated)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceStatus::Registering => "registering",
            ServiceStatus::Active => "active",
            ServiceStatus::Deprecated => "deprecated",
            ServiceStatus::Error => "error",
            ServiceStatus::Unregistering => "unregistering",
            ServiceStatus::Inactive => "inactive",
        };
        f.write_str(name)
    }
}

/// Descriptive metadata of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    /// Human-readable name
    pub name: String,

    /// Semantic version string
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Capabilities offered to callers
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    #[serde(default)]
    pub documentation: Option<String>,
}

impl ServiceMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            tags: Vec::new(),
            capabilities: Vec::new(),
            category: None,
            author: None,
            license: None,
            homepage: None,
            documentation: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Parsed semantic version
    pub fn semver(&self) -> Result<semver::Version, RegistrationValidationError> {
        semver::Version::parse(&self.version).map_err(|e| {
            RegistrationValidationError::InvalidVersion {
                version: self.version.clone(),
                reason: e.to_string(),
            }
        })
    }

    pub fn validate(&self) -> Result<(), RegistrationValidationError> {
        if self.name.trim().is_empty() {
            return Err(RegistrationValidationError::EmptyName);
        }
        if self.version.trim().is_empty() {
            return Err(RegistrationValidationError::EmptyVersion);
        }
        self.semver()?;
        Ok(())
    }

    /// Shallow merge: every field present in the update replaces the stored one.
    pub fn merge(&mut self, update: MetadataUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(version) = update.version {
            self.version = version;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(tags) = update.tags {
            self.tags = tags;
        }
        if let Some(capabilities) = update.capabilities {
            self.capabilities = capabilities;
        }
        if update.category.is_some() {
            self.category = update.category;
        }
        if update.author.is_some() {
            self.author = update.author;
        }
        if update.license.is_some() {
            self.license = update.license;
        }
        if update.homepage.is_some() {
            self.homepage = update.homepage;
        }
        if update.documentation.is_some() {
            self.documentation = update.documentation;
        }
    }
}

/// Partial metadata update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub capabilities: Option<Vec<String>>,
    pub category: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub documentation: Option<String>,
}

impl From<ServiceMetadata> for MetadataUpdate {
    /// Full replacement expressed as an update
    fn from(metadata: ServiceMetadata) -> Self {
        Self {
            name: Some(metadata.name),
            version: Some(metadata.version),
            description: Some(metadata.description),
            tags: Some(metadata.tags),
            capabilities: Some(metadata.capabilities),
            category: metadata.category,
            author: metadata.author,
            license: metadata.license,
            homepage: metadata.homepage,
            documentation: metadata.documentation,
        }
    }
}

/// Retry behaviour for calls made to the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,

    #[serde(with = "crate::duration_serde")]
    pub initial_backoff: Duration,

    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }
}

/// Operational configuration of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfiguration {
    /// Maximum concurrent connections accepted by the service
    pub max_connections: u32,

    /// Request and health-probe timeout
    #[serde(with = "crate::duration_serde")]
    pub timeout: Duration,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Explicit expiry; the cleanup sweep evicts the registration after it
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Free-form settings passed through to collaborators
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl Default for ServiceConfiguration {
    fn default() -> Self {
        Self {
            max_connections: 100,
            timeout: Duration::from_secs(5),
            retry_policy: RetryPolicy::default(),
            expires_at: None,
            settings: BTreeMap::new(),
        }
    }
}

impl ServiceConfiguration {
    pub fn validate(&self) -> Result<(), RegistrationValidationError> {
        if self.max_connections == 0 {
            return Err(RegistrationValidationError::InvalidConfiguration(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(RegistrationValidationError::InvalidConfiguration(
                "timeout must be non-zero".into(),
            ));
        }
        if self.retry_policy.backoff_multiplier < 1.0 {
            return Err(RegistrationValidationError::InvalidConfiguration(
                "retry backoff multiplier must be >= 1.0".into(),
            ));
        }
        Ok(())
    }

    pub fn merge(&mut self, update: ConfigurationUpdate) {
        if let Some(max_connections) = update.max_connections {
            self.max_connections = max_connections;
        }
        if let Some(timeout) = update.timeout {
            self.timeout = timeout;
        }
        if let Some(retry_policy) = update.retry_policy {
            self.retry_policy = retry_policy;
        }
        if update.expires_at.is_some() {
            self.expires_at = update.expires_at;
        }
        if let Some(settings) = update.settings {
            self.settings = settings;
        }
    }
}

/// Partial configuration update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigurationUpdate {
    pub max_connections: Option<u32>,

    #[serde(default, with = "crate::duration_serde::option")]
    pub timeout: Option<Duration>,

    pub retry_policy: Option<RetryPolicy>,

    pub expires_at: Option<DateTime<Utc>>,

    pub settings: Option<BTreeMap<String, serde_json::Value>>,
}

impl From<ServiceConfiguration> for ConfigurationUpdate {
    fn from(configuration: ServiceConfiguration) -> Self {
        Self {
            max_connections: Some(configuration.max_connections),
            timeout: Some(configuration.timeout),
            retry_policy: Some(configuration.retry_policy),
            expires_at: configuration.expires_at,
            settings: Some(configuration.settings),
        }
    }
}

/// A reachable address of a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Syntactic check: parseable absolute URL with a host
    pub fn parse(&self) -> Result<url::Url, RegistrationValidationError> {
        let parsed =
            url::Url::parse(&self.url).map_err(|e| RegistrationValidationError::InvalidEndpoint {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(RegistrationValidationError::InvalidEndpoint {
                url: self.url.clone(),
                reason: "missing host".into(),
            });
        }
        Ok(parsed)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Reachability verdict of the latest health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Not yet probed
    Unknown,
    Healthy,
    /// Reachable, but the observed error rate is above threshold
    Degraded,
    Unhealthy,
}

/// Health record embedded in a registration
///
/// Written only by the registry's health-check routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub state: HealthState,

    pub last_check: Option<DateTime<Utc>>,

    /// Time since the service was last observed transitioning to reachable
    #[serde(with = "crate::duration_serde")]
    pub uptime: Duration,

    /// Fastest endpoint response of the last check
    #[serde(default, with = "crate::duration_serde::option")]
    pub response_time: Option<Duration>,

    pub error_rate: f64,

    pub consecutive_failures: u32,

    pub last_error: Option<String>,

    pub healthy_since: Option<DateTime<Utc>>,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            last_check: None,
            uptime: Duration::ZERO,
            response_time: None,
            error_rate: 0.0,
            consecutive_failures: 0,
            last_error: None,
            healthy_since: None,
        }
    }
}

impl ServiceHealth {
    pub fn is_reachable(&self) -> bool {
        matches!(self.state, HealthState::Healthy | HealthState::Degraded)
    }
}

/// Usage counters of a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatistics {
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Running mean latency in milliseconds
    pub avg_latency_ms: f64,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl ServiceStatistics {
    pub fn record(&mut self, latency: Duration, success: bool) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.total_requests += 1;
        if !success {
            self.failed_requests += 1;
        }
        self.avg_latency_ms +=
            (latency_ms - self.avg_latency_ms) / self.total_requests as f64;
        self.last_request_at = Some(Utc::now());
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }
}

/// A declared service in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub id: ServiceId,
    pub service_type: ServiceType,
    pub metadata: ServiceMetadata,
    pub configuration: ServiceConfiguration,
    pub endpoints: Vec<Endpoint>,
    pub status: ServiceStatus,
    pub health: ServiceHealth,
    pub statistics: ServiceStatistics,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub unregistered_at: Option<DateTime<Utc>>,
}

impl ServiceRegistration {
    /// Build a fresh registration in the `Registering` state
    pub fn new(
        service_type: ServiceType,
        metadata: ServiceMetadata,
        configuration: ServiceConfiguration,
        endpoints: Vec<Endpoint>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ServiceId::generate(),
            service_type,
            metadata,
            configuration,
            endpoints,
            status: ServiceStatus::Registering,
            health: ServiceHealth::default(),
            statistics: ServiceStatistics::default(),
            registered_at: now,
            updated_at: now,
            unregistered_at: None,
        }
    }

    /// Validate the caller-supplied parts of the registration
    pub fn validate(&self) -> Result<(), RegistrationValidationError> {
        self.metadata.validate()?;
        self.configuration.validate()?;
        if self.endpoints.is_empty() {
            return Err(RegistrationValidationError::NoEndpoints);
        }
        for endpoint in &self.endpoints {
            endpoint.parse()?;
        }
        Ok(())
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.configuration
            .expires_at
            .map_or(false, |expires_at| expires_at <= now)
    }
}

/// Registration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationValidationError {
    #[error("Service name cannot be empty")]
    EmptyName,

    #[error("Service version cannot be empty")]
    EmptyVersion,

    #[error("Invalid semantic version {version}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("A service needs at least one endpoint")]
    NoEndpoints,

    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> ServiceRegistration {
        ServiceRegistration::new(
            ServiceType::Tool,
            ServiceMetadata::new("search", "1.2.0"),
            ServiceConfiguration::default(),
            vec![Endpoint::new("http://localhost:8080")],
        )
    }

    #[test]
    fn test_valid_registration() {
        assert!(registration().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_version_and_endpoints() {
        let mut reg = registration();
        reg.metadata.version = "one".into();
        assert!(matches!(
            reg.validate(),
            Err(RegistrationValidationError::InvalidVersion { .. })
        ));

        let mut reg = registration();
        reg.endpoints.clear();
        assert_eq!(reg.validate(), Err(RegistrationValidationError::NoEndpoints));

        let mut reg = registration();
        reg.endpoints = vec![Endpoint::new("not a url")];
        assert!(matches!(
            reg.validate(),
            Err(RegistrationValidationError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_status_transitions() {
        assert!(ServiceStatus::Registering.can_transition_to(ServiceStatus::Active));
        assert!(ServiceStatus::Deprecated.can_transition_to(ServiceStatus::Active));
        assert!(!ServiceStatus::Inactive.can_transition_to(ServiceStatus::Active));
        assert!(!ServiceStatus::Active.can_transition_to(ServiceStatus::Registering));
    }

    #[test]
    fn test_metadata_merge_is_shallow() {
        let mut metadata = ServiceMetadata::new("search", "1.0.0").with_tags(["a", "b"]);
        metadata.merge(MetadataUpdate {
            description: Some("full-text search".into()),
            tags: Some(vec!["c".into()]),
            ..Default::default()
        });
        assert_eq!(metadata.name, "search");
        assert_eq!(metadata.description, "full-text search");
        assert_eq!(metadata.tags, vec!["c".to_string()]);
    }

    #[test]
    fn test_statistics_running_mean() {
        let mut stats = ServiceStatistics::default();
        stats.record(Duration::from_millis(10), true);
        stats.record(Duration::from_millis(30), false);
        assert_eq!(stats.total_requests, 2);
        assert!((stats.avg_latency_ms - 20.0).abs() < 1e-9);
        assert!((stats.error_rate() - 0.5).abs() < 1e-9);
    }
}
