//! Configuration for harbor-daemon

use harbor_lifecycle::LifecycleConfig;
use harbor_registry::RegistryConfig;
use harbor_transport::TransportLayerConfig;
use harbor_types::{
    Endpoint, ScalingConfig, ServiceConfiguration, ServiceMetadata, ServiceType, UpdateConfig,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarborConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub transport: TransportLayerConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Control channel and instance checks
    #[serde(default)]
    pub control: ControlConfig,

    /// Endpoint probe used by the registry and the instance driver
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Services registered and started on boot
    #[serde(default)]
    pub services: Vec<BootstrapService>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Control channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// In-process backend that receives drain signals; `None` leaves
    /// delivery to the configured transports only
    #[serde(default = "default_loopback_url")]
    pub loopback_url: Option<String>,

    /// Timeout of a single instance health check
    #[serde(default = "default_instance_check_timeout", with = "harbor_types::duration_serde")]
    pub instance_check_timeout: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            loopback_url: default_loopback_url(),
            instance_check_timeout: default_instance_check_timeout(),
        }
    }
}

/// Endpoint reachability probe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeConfig {
    /// TCP connect to the endpoint's host and port
    #[default]
    Tcp,

    /// HTTP GET, optionally on a health path joined to the endpoint
    Http {
        #[serde(default)]
        path: Option<String>,
    },
}

/// A service declared in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapService {
    pub service_type: ServiceType,

    pub metadata: ServiceMetadata,

    #[serde(default)]
    pub configuration: ServiceConfiguration,

    pub endpoints: Vec<String>,

    /// Instance-count policy; lifecycle defaults when absent
    #[serde(default)]
    pub scaling: Option<ScalingConfig>,

    /// Rollout policy; lifecycle defaults when absent
    #[serde(default)]
    pub update: Option<UpdateConfig>,
}

impl BootstrapService {
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.iter().map(Endpoint::new).collect()
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_loopback_url() -> Option<String> {
    Some("memory://harbor-control".to_string())
}

fn default_instance_check_timeout() -> Duration {
    Duration::from_secs(5)
}

impl HarborConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `HARBOR_`-prefixed environment variables (`HARBOR_SERVER__LISTEN_ADDR`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&HarborConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with HARBOR_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("HARBOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HarborConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.control.loopback_url.as_deref(),
            Some("memory://harbor-control")
        );
        assert_eq!(config.probe, ProbeConfig::Tcp);
        assert!(config.services.is_empty());
        assert_eq!(config.lifecycle.grace_period, Duration::from_secs(30));
    }

    #[test]
    fn test_load_without_file_yields_defaults() {
        let config = HarborConfig::load(None).unwrap();
        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert_eq!(config.registry.max_services, 10_000);
        assert_eq!(config.lifecycle.start_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_load_file_with_services() {
        let path = std::env::temp_dir().join(format!("harbord-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[server]
listen_addr = "0.0.0.0:9000"

[lifecycle]
start_timeout = 2000

[probe]
kind = "http"
path = "/healthz"

[[services]]
service_type = "tool"
endpoints = ["http://127.0.0.1:9100", "http://127.0.0.1:9101"]

[services.metadata]
name = "search"
version = "1.2.0"

[services.scaling]
min_instances = 2
max_instances = 4
"#
        )
        .unwrap();

        let config = HarborConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.lifecycle.start_timeout, Duration::from_millis(2000));
        assert_eq!(config.lifecycle.grace_period, Duration::from_secs(30));
        assert_eq!(
            config.probe,
            ProbeConfig::Http {
                path: Some("/healthz".to_string())
            }
        );

        let service = &config.services[0];
        assert_eq!(service.service_type, ServiceType::Tool);
        assert_eq!(service.metadata.name, "search");
        assert_eq!(service.endpoints().len(), 2);
        assert_eq!(service.configuration, ServiceConfiguration::default());
        let scaling = service.scaling.as_ref().unwrap();
        assert_eq!((scaling.min_instances, scaling.max_instances), (2, 4));
        assert!(service.update.is_none());
    }
}
