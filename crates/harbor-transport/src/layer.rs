//! The transport layer: backend set, active selection and failover
//!
//! The active backend is only re-chosen when there is none, when it leaves
//! `Connected`, when it is removed, or when the strategy changes. Sends clone
//! the backend handle out of the lock before awaiting, so adding or removing
//! backends never interrupts in-flight sends.

use crate::backends::DefaultTransportFactory;
use crate::balancer::{Candidate, LoadBalancer, LoadBalancingStrategy};
use crate::config::{TransportConfig, TransportKind, TransportLayerConfig};
use crate::error::{Result, TransportError};
use crate::message::Message;
use crate::transport::{Transport, TransportFactory, TransportStatistics, TransportStatus};
use futures::future::join_all;
use harbor_types::{ErrorKind, EventSource, HarborEvent, HarborEventEnvelope};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

struct Backend {
    config: TransportConfig,
    transport: Arc<dyn Transport>,
}

/// A message of a batch that could not be delivered
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    /// Id of the undelivered message
    pub message_id: Uuid,
    /// Failure category
    pub kind: ErrorKind,
    /// Failure detail
    pub error: String,
}

/// Result of [`TransportLayer::send_batch`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    /// Messages delivered
    pub sent: usize,
    /// Messages not delivered, in batch order
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    /// Every message was delivered
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Counters of one backend as seen by the layer
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatistics {
    /// Backend address
    pub url: String,
    /// Backend implementation
    pub kind: TransportKind,
    /// Connection status at snapshot time
    pub status: TransportStatus,
    /// Configured weight
    pub weight: u32,
    /// Backend counters
    pub statistics: TransportStatistics,
}

/// Layer-wide statistics
#[derive(Debug, Clone, Serialize)]
pub struct LayerStatistics {
    /// Url of the active backend
    pub active: Option<String>,
    /// Selection strategy in use
    pub strategy: LoadBalancingStrategy,
    /// Completed failovers
    pub failovers: u64,
    /// Backends currently connected
    pub connected: usize,
    /// Sends summed over backends
    pub messages_sent: u64,
    /// Errors summed over backends
    pub errors: u64,
    /// Per-backend view, in registration order
    pub backends: Vec<BackendStatistics>,
}

/// Routes messages over a set of backends
pub struct TransportLayer {
    config: TransportLayerConfig,
    factory: Arc<dyn TransportFactory>,
    backends: RwLock<Vec<Backend>>,
    active: RwLock<Option<String>>,
    balancer: Mutex<LoadBalancer>,
    connected: AtomicBool,
    failovers: AtomicU64,
    event_tx: broadcast::Sender<HarborEventEnvelope>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportLayer {
    /// Build the layer and the backends listed in the configuration
    pub fn new(config: TransportLayerConfig, factory: Arc<dyn TransportFactory>) -> Result<Self> {
        let mut backends: Vec<Backend> = Vec::with_capacity(config.transports.len());
        for transport_config in &config.transports {
            if backends.iter().any(|b| b.config.url == transport_config.url) {
                return Err(TransportError::AlreadyExists(transport_config.url.clone()));
            }
            backends.push(Backend {
                config: transport_config.clone(),
                transport: factory.create(transport_config)?,
            });
        }

        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Ok(Self {
            balancer: Mutex::new(LoadBalancer::new(config.strategy)),
            config,
            factory,
            backends: RwLock::new(backends),
            active: RwLock::new(None),
            connected: AtomicBool::new(false),
            failovers: AtomicU64::new(0),
            event_tx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Build with the built-in backend factory
    pub fn from_config(config: TransportLayerConfig) -> Result<Self> {
        Self::new(config, Arc::new(DefaultTransportFactory))
    }

    /// Subscribe to transport events
    pub fn subscribe(&self) -> broadcast::Receiver<HarborEventEnvelope> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: HarborEvent) {
        let _ = self
            .event_tx
            .send(HarborEventEnvelope::new(EventSource::Transport, event));
    }

    async fn snapshot(&self) -> Vec<(TransportConfig, Arc<dyn Transport>)> {
        self.backends
            .read()
            .await
            .iter()
            .map(|b| (b.config.clone(), Arc::clone(&b.transport)))
            .collect()
    }

    async fn find(&self, url: &str) -> Option<Arc<dyn Transport>> {
        self.backends
            .read()
            .await
            .iter()
            .find(|b| b.config.url == url)
            .map(|b| Arc::clone(&b.transport))
    }

    // ═══════════════════════════════════════════════════════════════════
    // CONNECTION MANAGEMENT
    // ═══════════════════════════════════════════════════════════════════

    /// Connect every backend in parallel; succeeds if at least one connects
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<()> {
        let backends = self.snapshot().await;
        if backends.is_empty() {
            return Err(TransportError::NoTransports);
        }

        let results = join_all(backends.iter().map(|(_, t)| t.connect())).await;
        let mut connected = 0;
        for ((config, _), result) in backends.iter().zip(results) {
            match result {
                Ok(()) => {
                    connected += 1;
                    info!(url = %config.url, "Transport connected");
                    self.emit(HarborEvent::TransportConnected {
                        url: config.url.clone(),
                    });
                }
                Err(e) => {
                    warn!(url = %config.url, error = %e, "Transport failed to connect");
                    self.emit(HarborEvent::TransportFailed {
                        url: config.url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if connected == 0 {
            return Err(TransportError::NoConnectedTransports);
        }
        self.connected.store(true, Ordering::SeqCst);
        self.reselect().await;
        Ok(())
    }

    /// Disconnect every backend in parallel
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let backends = self.snapshot().await;
        let results = join_all(backends.iter().map(|(_, t)| t.disconnect())).await;

        for ((config, _), result) in backends.iter().zip(results) {
            if let Err(e) = result {
                warn!(url = %config.url, error = %e, "Transport failed to disconnect cleanly");
            }
            self.emit(HarborEvent::TransportDisconnected {
                url: config.url.clone(),
            });
        }
        self.set_active(None).await;
        Ok(())
    }

    /// Whether any backend is connected
    pub async fn is_connected(&self) -> bool {
        self.backends
            .read()
            .await
            .iter()
            .any(|b| b.transport.status() == TransportStatus::Connected)
    }

    /// Create a backend from configuration and add it
    pub async fn add_transport(&self, config: TransportConfig) -> Result<()> {
        let transport = self.factory.create(&config)?;
        self.attach(config, transport).await
    }

    /// Add an already built backend; it is connected right away if the
    /// layer is connected
    pub async fn attach(&self, config: TransportConfig, transport: Arc<dyn Transport>) -> Result<()> {
        {
            let mut backends = self.backends.write().await;
            if backends.iter().any(|b| b.config.url == config.url) {
                return Err(TransportError::AlreadyExists(config.url));
            }
            backends.push(Backend {
                config: config.clone(),
                transport: Arc::clone(&transport),
            });
        }
        debug!(url = %config.url, kind = ?config.kind, "Transport added");

        if self.connected.load(Ordering::SeqCst) {
            match transport.connect().await {
                Ok(()) => {
                    info!(url = %config.url, "Transport connected");
                    self.emit(HarborEvent::TransportConnected { url: config.url });
                    if self.active.read().await.is_none() {
                        self.reselect().await;
                    }
                }
                Err(e) => {
                    warn!(url = %config.url, error = %e, "Transport failed to connect");
                    self.emit(HarborEvent::TransportFailed {
                        url: config.url,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Remove and disconnect a backend
    pub async fn remove_transport(&self, url: &str) -> Result<()> {
        let removed = {
            let mut backends = self.backends.write().await;
            let position = backends
                .iter()
                .position(|b| b.config.url == url)
                .ok_or_else(|| TransportError::NotFound(url.to_string()))?;
            backends.remove(position)
        };

        if let Err(e) = removed.transport.disconnect().await {
            warn!(url, error = %e, "Transport failed to disconnect cleanly");
        }
        debug!(url, "Transport removed");
        self.emit(HarborEvent::TransportDisconnected {
            url: url.to_string(),
        });

        if self.active.read().await.as_deref() == Some(url) {
            self.reselect().await;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // ACTIVE SELECTION
    // ═══════════════════════════════════════════════════════════════════

    /// Url of the backend currently carrying traffic
    pub async fn get_active_transport(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    /// Selection strategy in use
    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.balancer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strategy()
    }

    /// Change the balancing policy and re-choose the active backend
    pub async fn set_load_balancing_strategy(&self, strategy: LoadBalancingStrategy) {
        self.balancer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_strategy(strategy);
        info!(?strategy, "Load balancing strategy changed");
        if self.connected.load(Ordering::SeqCst) {
            self.reselect().await;
        }
    }

    async fn reselect(&self) -> Option<(String, Arc<dyn Transport>)> {
        let connected: Vec<(TransportConfig, Arc<dyn Transport>)> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|(_, t)| t.status() == TransportStatus::Connected)
            .collect();

        let chosen = {
            let candidates: Vec<Candidate<'_>> = connected
                .iter()
                .map(|(config, transport)| Candidate {
                    url: &config.url,
                    weight: config.weight,
                    active_connections: transport.active_connections(),
                })
                .collect();
            self.balancer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .select(&candidates)
        };

        let next = chosen
            .and_then(|index| connected.get(index))
            .map(|(config, transport)| (config.url.clone(), Arc::clone(transport)));
        self.set_active(next.as_ref().map(|(url, _)| url.clone()))
            .await;
        next
    }

    async fn set_active(&self, url: Option<String>) {
        let previous = {
            let mut active = self.active.write().await;
            std::mem::replace(&mut *active, url.clone())
        };
        if previous != url {
            info!(from = ?previous, to = ?url, "Active transport changed");
            self.emit(HarborEvent::ActiveTransportChanged {
                from: previous,
                to: url,
            });
        }
    }

    async fn ensure_active(&self) -> Result<(String, Arc<dyn Transport>)> {
        let current = self.active.read().await.clone();
        if let Some(url) = current {
            if let Some(transport) = self.find(&url).await {
                if transport.status() == TransportStatus::Connected {
                    return Ok((url, transport));
                }
            }
        }
        self.reselect()
            .await
            .ok_or(TransportError::NoConnectedTransports)
    }

    // ═══════════════════════════════════════════════════════════════════
    // SENDING
    // ═══════════════════════════════════════════════════════════════════

    /// Send through the active backend, failing over on error
    pub async fn send(&self, message: &Message) -> Result<()> {
        let (url, transport) = self.ensure_active().await?;
        let error = match transport.send(message).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if !self.config.failover {
            return Err(error);
        }
        self.failover(&url, message, error).await
    }

    async fn failover(&self, failed_url: &str, message: &Message, error: TransportError) -> Result<()> {
        warn!(url = failed_url, error = %error, "Send failed, attempting failover");
        self.emit(HarborEvent::FailoverStarted {
            from: failed_url.to_string(),
            reason: error.to_string(),
        });

        let others: Vec<(TransportConfig, Arc<dyn Transport>)> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|(config, transport)| {
                config.url != failed_url && transport.status() == TransportStatus::Connected
            })
            .collect();
        let attempted = others.len();

        for (config, transport) in others {
            match transport.send(message).await {
                Ok(()) => {
                    self.failovers.fetch_add(1, Ordering::SeqCst);
                    self.set_active(Some(config.url.clone())).await;
                    info!(from = failed_url, to = %config.url, "Failover succeeded");
                    self.emit(HarborEvent::FailoverSucceeded {
                        from: failed_url.to_string(),
                        to: config.url,
                    });
                    return Ok(());
                }
                Err(e) => {
                    debug!(url = %config.url, error = %e, "Failover candidate failed");
                }
            }
        }

        error!(url = failed_url, attempted, "Failover exhausted");
        self.emit(HarborEvent::FailoverExhausted {
            from: failed_url.to_string(),
            attempted,
        });
        Err(error)
    }

    /// Send each message in order; failures do not stop the batch
    pub async fn send_batch(&self, messages: &[Message]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for message in messages {
            match self.send(message).await {
                Ok(()) => outcome.sent += 1,
                Err(e) => outcome.failures.push(BatchFailure {
                    message_id: message.id,
                    kind: e.kind(),
                    error: e.to_string(),
                }),
            }
        }
        outcome
    }

    // ═══════════════════════════════════════════════════════════════════
    // STATISTICS AND HEALTH
    // ═══════════════════════════════════════════════════════════════════

    /// Snapshot of layer and backend counters
    pub async fn statistics(&self) -> LayerStatistics {
        let backends: Vec<BackendStatistics> = self
            .snapshot()
            .await
            .into_iter()
            .map(|(config, transport)| BackendStatistics {
                url: config.url,
                kind: config.kind,
                status: transport.status(),
                weight: config.weight,
                statistics: transport.statistics(),
            })
            .collect();

        LayerStatistics {
            active: self.get_active_transport().await,
            strategy: self.strategy(),
            failovers: self.failovers.load(Ordering::SeqCst),
            connected: backends
                .iter()
                .filter(|b| b.status == TransportStatus::Connected)
                .count(),
            messages_sent: backends.iter().map(|b| b.statistics.messages_sent).sum(),
            errors: backends.iter().map(|b| b.statistics.errors).sum(),
            backends,
        }
    }

    /// Re-evaluate every backend and re-choose the active one if it is no
    /// longer connected
    pub async fn run_health_check(&self) {
        let backends = self.snapshot().await;
        let transitions = join_all(backends.iter().map(|(_, transport)| async move {
            let before = transport.status();
            (before, transport.health_check().await)
        }))
        .await;

        for ((config, _), (before, after)) in backends.iter().zip(transitions) {
            if before == after {
                continue;
            }
            match after {
                TransportStatus::Error => {
                    warn!(url = %config.url, "Transport health check failed");
                    self.emit(HarborEvent::TransportFailed {
                        url: config.url.clone(),
                        reason: "health check failed".into(),
                    });
                }
                TransportStatus::Connected => {
                    info!(url = %config.url, "Transport recovered");
                    self.emit(HarborEvent::TransportConnected {
                        url: config.url.clone(),
                    });
                }
                _ => {}
            }
        }

        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        let active = self.active.read().await.clone();
        let active_ok = active.as_deref().is_some_and(|url| {
            backends
                .iter()
                .any(|(c, t)| c.url == url && t.status() == TransportStatus::Connected)
        });
        if !active_ok {
            self.reselect().await;
        }
    }

    /// Spawn the health-check loop; calling twice is a no-op
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return;
        }

        let layer = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(layer.config.health_check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = layer.cancel.cancelled() => break,
                    _ = interval.tick() => layer.run_health_check().await,
                }
            }
        }));
    }

    /// Stop the health-check loop
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Transport task ended abnormally");
            }
        }
        info!("Transport layer shut down");
    }
}
