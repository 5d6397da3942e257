//! Operation context shared by lifecycle operations and update executors

use crate::driver::InstanceDriver;
use crate::error::{LifecycleError, Result};
use crate::state::ServiceEntry;
use chrono::Utc;
use harbor_transport::{Message, TransportLayer};
use harbor_types::{
    EventSource, HarborEvent, HarborEventEnvelope, InstanceHealth, InstanceId, InstancePhase,
    Phase, ServiceId, ServiceInstance, ServiceRegistration,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Everything one operation needs to manage a service's instance pool
///
/// Instances are created against [`OperationContext::registration`], the
/// registration the operation converges to.
pub struct OperationContext {
    entry: Arc<ServiceEntry>,
    driver: Arc<dyn InstanceDriver>,
    transport: Arc<TransportLayer>,
    events: broadcast::Sender<HarborEventEnvelope>,
    registration: ServiceRegistration,
    phase: Phase,
    cancel: CancellationToken,
    health_timeout: Duration,
    poll_interval: Duration,
}

impl OperationContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        entry: Arc<ServiceEntry>,
        driver: Arc<dyn InstanceDriver>,
        transport: Arc<TransportLayer>,
        events: broadcast::Sender<HarborEventEnvelope>,
        registration: ServiceRegistration,
        phase: Phase,
        cancel: CancellationToken,
        health_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            entry,
            driver,
            transport,
            events,
            registration,
            phase,
            cancel,
            health_timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.entry.id
    }

    /// Phase the service is in while this operation runs
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn registration(&self) -> &ServiceRegistration {
        &self.registration
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        Ok(())
    }

    fn cancelled(&self) -> LifecycleError {
        LifecycleError::Cancelled {
            service_id: self.entry.id,
            phase: self.phase,
        }
    }

    fn instance_error(&self, reason: impl Into<String>) -> LifecycleError {
        LifecycleError::Instance {
            service_id: self.entry.id,
            phase: self.phase,
            reason: reason.into(),
        }
    }

    fn emit(&self, event: HarborEvent) {
        let _ = self
            .events
            .send(HarborEventEnvelope::new(EventSource::Lifecycle, event));
    }

    // ═══════════════════════════════════════════════════════════════════
    // POOL QUERIES
    // ═══════════════════════════════════════════════════════════════════

    pub async fn instances(&self) -> Vec<ServiceInstance> {
        self.entry.instances().await
    }

    pub async fn instance_count(&self) -> usize {
        self.entry.state.read().await.instances.len()
    }

    /// Ids in `ids` whose last observed health is `Healthy`
    pub async fn count_healthy(&self, ids: &[InstanceId]) -> usize {
        let state = self.entry.state.read().await;
        ids.iter()
            .filter(|id| state.instance(**id).map_or(false, |i| i.is_healthy()))
            .count()
    }

    // ═══════════════════════════════════════════════════════════════════
    // CREATION
    // ═══════════════════════════════════════════════════════════════════

    /// Launch one instance of the target registration and add it to the pool
    #[instrument(skip(self), fields(service_id = %self.entry.id))]
    pub async fn create_instance(&self) -> Result<ServiceInstance> {
        self.ensure_not_cancelled()?;

        let instance = self
            .driver
            .launch(&self.registration)
            .await
            .map_err(|e| self.instance_error(format!("launch failed: {e}")))?;

        let instance_count = {
            let mut state = self.entry.state.write().await;
            state.instances.push(instance.clone());
            state.instances.len()
        };

        info!(
            instance_id = %instance.id,
            version = %instance.version,
            instance_count,
            "Instance created"
        );
        self.emit(HarborEvent::InstanceCreated {
            service_id: self.entry.id,
            instance_id: instance.id,
            version: instance.version.clone(),
            instance_count,
        });
        Ok(instance)
    }

    /// Launch `count` instances; stops at the first failure or cancellation
    pub async fn create_instances(&self, count: usize) -> Result<Vec<InstanceId>> {
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            created.push(self.create_instance().await?.id);
        }
        Ok(created)
    }

    // ═══════════════════════════════════════════════════════════════════
    // HEALTH
    // ═══════════════════════════════════════════════════════════════════

    /// Ask the driver for fresh health and usage of `ids`; returns how many
    /// are healthy
    pub async fn refresh(&self, ids: &[InstanceId]) -> usize {
        let mut healthy = 0;
        for id in ids {
            let Some(instance) = self.entry.state.read().await.instance(*id).cloned() else {
                continue;
            };

            let report = match self.driver.check(&instance).await {
                Ok(report) => Some(report),
                Err(e) => {
                    debug!(instance_id = %id, error = %e, "Instance check failed");
                    None
                }
            };

            let mut state = self.entry.state.write().await;
            if let Some(stored) = state.instance_mut(*id) {
                match report {
                    Some(report) => {
                        stored.health = report.health;
                        stored.resources = report.resources;
                    }
                    None => stored.health = InstanceHealth::Unknown,
                }
                if stored.health == InstanceHealth::Healthy
                    && stored.phase == InstancePhase::Starting
                {
                    stored.phase = InstancePhase::Running;
                }
                stored.updated_at = Utc::now();
                if stored.is_healthy() {
                    healthy += 1;
                }
            }
        }
        healthy
    }

    /// Wait until every instance in `ids` reports healthy
    ///
    /// Fails with a timeout once the health deadline passes and with
    /// `Cancelled` as soon as the operation is cancelled.
    #[instrument(skip(self, ids), fields(service_id = %self.entry.id, count = ids.len()))]
    pub async fn wait_for_healthy(&self, ids: &[InstanceId]) -> Result<()> {
        let deadline = Instant::now() + self.health_timeout;

        loop {
            self.ensure_not_cancelled()?;
            let healthy = self.refresh(ids).await;
            if healthy >= ids.len() {
                debug!(count = ids.len(), "Instances healthy");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(healthy, expected = ids.len(), "Instances did not become healthy");
                return Err(LifecycleError::Timeout {
                    service_id: self.entry.id,
                    phase: self.phase,
                    operation: format!("{} instance(s) to become healthy", ids.len()),
                    timeout_ms: self.health_timeout.as_millis() as u64,
                });
            }

            let wake = (now + self.poll_interval).min(deadline);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Cancellable pause, used for grace periods and stabilization windows
    pub async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(self.cancelled()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // TERMINATION
    // ═══════════════════════════════════════════════════════════════════

    /// Tell an instance to stop accepting new work
    #[instrument(skip(self), fields(service_id = %self.entry.id))]
    pub async fn drain_instance(&self, id: InstanceId) -> Result<()> {
        let (instance, previous) = self.mark_phase(id, InstancePhase::Draining).await?;

        let mut message = Message::control(instance.endpoint.clone(), "drain");
        message.payload = serde_json::json!({
            "service_id": self.entry.id,
            "instance_id": id,
        });

        if let Err(source) = self.transport.send(&message).await {
            // Undelivered drain leaves the instance serving
            let mut state = self.entry.state.write().await;
            if let Some(stored) = state.instance_mut(id) {
                if stored.phase == InstancePhase::Draining {
                    stored.phase = previous;
                    stored.updated_at = Utc::now();
                }
            }
            return Err(LifecycleError::Transport {
                service_id: self.entry.id,
                phase: self.phase,
                source,
            });
        }
        Ok(())
    }

    /// Drain when a transport is available, then terminate
    pub async fn retire_instance(&self, id: InstanceId) -> Result<()> {
        if self.transport.is_connected().await {
            if let Err(e) = self.drain_instance(id).await {
                warn!(instance_id = %id, error = %e, "Drain signal not delivered");
            }
        }
        self.terminate_instance(id).await
    }

    /// Terminate an instance immediately and drop it from the pool
    #[instrument(skip(self), fields(service_id = %self.entry.id))]
    pub async fn terminate_instance(&self, id: InstanceId) -> Result<()> {
        let (instance, _) = self.mark_phase(id, InstancePhase::Terminating).await?;

        if let Err(e) = self.driver.terminate(&instance).await {
            let mut state = self.entry.state.write().await;
            if let Some(stored) = state.instance_mut(id) {
                stored.phase = InstancePhase::Failed;
            }
            return Err(self.instance_error(format!("terminate {id} failed: {e}")));
        }

        let instance_count = {
            let mut state = self.entry.state.write().await;
            state.remove_instance(id);
            state.instances.len()
        };

        info!(instance_id = %id, instance_count, "Instance terminated");
        self.emit(HarborEvent::InstanceTerminated {
            service_id: self.entry.id,
            instance_id: id,
            instance_count,
        });
        Ok(())
    }

    /// Terminate every instance in `ids`, reporting the first failure after
    /// attempting all of them
    pub async fn terminate_all(&self, ids: &[InstanceId]) -> Result<()> {
        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.terminate_instance(*id).await {
                warn!(instance_id = %id, error = %e, "Termination failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Set an instance's phase, returning the updated record and the phase it replaced
    async fn mark_phase(
        &self,
        id: InstanceId,
        phase: InstancePhase,
    ) -> Result<(ServiceInstance, InstancePhase)> {
        let mut state = self.entry.state.write().await;
        let instance =
            state
                .instance_mut(id)
                .ok_or(LifecycleError::InstanceNotFound {
                    service_id: self.entry.id,
                    instance_id: id,
                })?;
        let previous = std::mem::replace(&mut instance.phase, phase);
        instance.updated_at = Utc::now();
        Ok((instance.clone(), previous))
    }
}
