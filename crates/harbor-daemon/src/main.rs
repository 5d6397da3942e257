//! Harbor Daemon - Control plane process
//!
//! The Harbor daemon provides:
//! - Service registry with background health and cleanup sweeps
//! - Lifecycle management of declared services, with auto-scaling and auto-healing
//! - Transport layer for control messages
//! - Read-only REST API over the state of all three

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod error;
mod server;

use config::HarborConfig;
use error::DaemonError;
use server::Server;

/// Harbor Daemon CLI
#[derive(Parser)]
#[command(name = "harbord")]
#[command(about = "Harbor Daemon - Service control plane", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HARBOR_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the configuration
    #[arg(short, long, env = "HARBOR_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level, overrides the configuration
    #[arg(long, env = "HARBOR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "HARBOR_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = HarborConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // CLI overrides
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address {listen}: {e}")))?;
    }

    init_tracing(&config.logging.level, config.logging.json);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        services = config.services.len(),
        "Starting Harbor daemon"
    );

    let server = Server::new(config).await?;
    server.run().await?;
    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
