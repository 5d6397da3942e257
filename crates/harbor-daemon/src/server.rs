//! Component wiring and process lifecycle

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::{BootstrapService, HarborConfig, ProbeConfig};
use crate::error::{DaemonError, DaemonResult};
use futures::future::join_all;
use harbor_lifecycle::{EndpointInstanceDriver, LifecycleManager};
use harbor_registry::{HealthProbe, HttpProbe, ServiceRegistry, TcpProbe};
use harbor_transport::{Message, MemoryTransport, TransportConfig, TransportLayer};
use harbor_types::HarborEventEnvelope;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Harbor Daemon Server
pub struct Server {
    config: HarborConfig,
    registry: Arc<ServiceRegistry>,
    transport: Arc<TransportLayer>,
    lifecycle: Arc<LifecycleManager>,
    control_rx: Option<mpsc::UnboundedReceiver<Message>>,
}

impl Server {
    /// Build every component from the configuration
    pub async fn new(config: HarborConfig) -> DaemonResult<Self> {
        let probe = build_probe(&config.probe);
        info!(probe = probe.name(), "Endpoint probe selected");

        let registry = Arc::new(ServiceRegistry::new(
            config.registry.clone(),
            Arc::clone(&probe),
        ));

        let transport = Arc::new(TransportLayer::from_config(config.transport.clone())?);
        let control_rx = match &config.control.loopback_url {
            Some(url) => {
                let loopback = Arc::new(MemoryTransport::new(url.clone()));
                let rx = loopback.take_receiver();
                transport
                    .attach(TransportConfig::memory(url.clone()), loopback)
                    .await?;
                rx
            }
            None => None,
        };

        let driver = Arc::new(EndpointInstanceDriver::new(
            probe,
            config.control.instance_check_timeout,
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            config.lifecycle.clone(),
            Arc::clone(&registry),
            Arc::clone(&transport),
            driver,
        ));

        Ok(Self {
            config,
            registry,
            transport,
            lifecycle,
            control_rx,
        })
    }

    /// Run until Ctrl+C or SIGTERM, then stop every service and loop
    pub async fn run(mut self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        if let Err(e) = self.transport.connect().await {
            warn!(error = %e, "Transport not connected, graceful stops will fail");
        }

        let mut background: Vec<JoinHandle<()>> = vec![
            tokio::spawn(log_events("registry", self.registry.subscribe())),
            tokio::spawn(log_events("transport", self.transport.subscribe())),
            tokio::spawn(log_events("lifecycle", self.lifecycle.subscribe())),
        ];
        if let Some(rx) = self.control_rx.take() {
            background.push(tokio::spawn(consume_control(rx)));
        }

        self.registry.start();
        self.transport.start();
        self.lifecycle.start();

        let shutdown = CancellationToken::new();
        let bootstrap = tokio::spawn(bootstrap(
            Arc::clone(&self.registry),
            Arc::clone(&self.lifecycle),
            self.config.services.clone(),
            shutdown.clone(),
        ));

        let state = AppState::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.transport),
        );
        let app = create_router(state, self.config.server.enable_cors);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DaemonError::Server(format!("Failed to bind {addr}: {e}")))?;
        info!(%addr, "Harbor daemon listening");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        info!("Harbor daemon shutting down");
        shutdown.cancel();
        for id in self.lifecycle.managed_services() {
            if let Ok(true) = self.lifecycle.cancel_operation(id).await {
                debug!(service_id = %id, "Interrupted running operation");
            }
        }
        if let Err(e) = bootstrap.await {
            warn!(error = %e, "Bootstrap task ended abnormally");
        }

        self.stop_services().await;
        self.lifecycle.shutdown().await;
        self.registry.shutdown().await;
        self.transport.shutdown().await;
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }
        for task in background {
            task.abort();
        }

        served?;
        info!("Harbor daemon stopped");
        Ok(())
    }

    async fn stop_services(&self) {
        let ids = self.lifecycle.managed_services();
        let results = join_all(
            ids.iter()
                .map(|id| self.lifecycle.stop_service(*id, true)),
        )
        .await;

        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(()) => debug!(service_id = %id, "Service stopped"),
                Err(e) => warn!(service_id = %id, error = %e, "Service did not stop cleanly"),
            }
        }
    }
}

fn build_probe(config: &ProbeConfig) -> Arc<dyn HealthProbe> {
    match config {
        ProbeConfig::Tcp => Arc::new(TcpProbe),
        ProbeConfig::Http { path } => {
            let probe = HttpProbe::new();
            Arc::new(match path {
                Some(path) => probe.with_path(path.clone()),
                None => probe,
            })
        }
    }
}

/// Register each declared service in the catalog, then hand it to the
/// lifecycle manager; failures are logged and the next service proceeds
async fn bootstrap(
    registry: Arc<ServiceRegistry>,
    lifecycle: Arc<LifecycleManager>,
    services: Vec<BootstrapService>,
    shutdown: CancellationToken,
) {
    for service in services {
        if shutdown.is_cancelled() {
            break;
        }
        let name = service.metadata.name.clone();
        let endpoints = service.endpoints();

        let id = match registry
            .register_service(
                service.service_type,
                service.metadata,
                service.configuration,
                endpoints,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(service = %name, error = %e, "Bootstrap registration failed");
                continue;
            }
        };

        let registration = match registry.get_service(id) {
            Ok(registration) => registration,
            Err(e) => {
                error!(service = %name, error = %e, "Registered service disappeared");
                continue;
            }
        };

        match lifecycle
            .register_service(registration, service.scaling, service.update)
            .await
        {
            Ok(()) => info!(service = %name, service_id = %id, "Bootstrap service running"),
            Err(e) => error!(service = %name, service_id = %id, error = %e, "Bootstrap start failed"),
        }
    }
}

/// Log drain and other control signals delivered over the loopback backend
async fn consume_control(mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        info!(
            method = %message.method,
            target = message.target.as_ref().map(|t| t.url.as_str()).unwrap_or("-"),
            payload = %message.payload,
            "Control signal"
        );
    }
}

async fn log_events(component: &'static str, mut rx: broadcast::Receiver<HarborEventEnvelope>) {
    loop {
        match rx.recv().await {
            Ok(envelope) => debug!(
                component,
                severity = ?envelope.severity,
                event = ?envelope.event,
                "Event"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(component, skipped, "Event log lagged")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
