//! The lifecycle manager
//!
//! Each managed service owns a [`ServiceEntry`]: an operation lock that
//! serializes start, stop, scale and update, and a state lock around the
//! phase, policies and instance pool. Operations take the operation lock
//! with `try_lock` and fail fast with a state conflict when another
//! operation already holds it. The state lock is never held across a
//! driver or transport call.

use crate::config::LifecycleConfig;
use crate::context::OperationContext;
use crate::driver::InstanceDriver;
use crate::error::{LifecycleError, Result};
use crate::scheduler::PendingAction;
use crate::state::{EventHistory, ServiceEntry, ServiceState};
use crate::strategies::{create_executor, RecreateExecutor, UpdateExecutor, UpdateOutcome};
use dashmap::DashMap;
use harbor_registry::{RegistryError, ServiceRegistry};
use harbor_transport::TransportLayer;
use harbor_types::{
    ActionId, ConfigurationUpdate, EventSource, HarborEvent, HarborEventEnvelope, InstanceHealth,
    InstanceId, LifecycleEvent, MetadataUpdate, Phase, ScalingConfig, ServiceId, ServiceInstance,
    ServiceRegistration, ServiceStatus, UpdateConfig, UpdateStrategy,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Point-in-time view of one managed service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatusReport {
    pub service_id: ServiceId,
    pub name: String,
    /// Version the pool converges to
    pub version: String,
    pub phase: Phase,
    pub instances: usize,
    pub healthy_instances: usize,
    /// Instance count per running version
    pub versions: BTreeMap<String, usize>,
    pub scaling: ScalingConfig,
    pub update: UpdateConfig,
    pub operation_in_progress: bool,
    pub last_event: Option<LifecycleEvent>,
}

/// Drives every managed service through its phase state machine
pub struct LifecycleManager {
    config: LifecycleConfig,
    registry: Arc<ServiceRegistry>,
    transport: Arc<TransportLayer>,
    driver: Arc<dyn InstanceDriver>,
    services: DashMap<ServiceId, Arc<ServiceEntry>>,
    history: Mutex<EventHistory>,
    pub(crate) actions: DashMap<ActionId, PendingAction>,
    event_tx: broadcast::Sender<HarborEventEnvelope>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(
        config: LifecycleConfig,
        registry: Arc<ServiceRegistry>,
        transport: Arc<TransportLayer>,
        driver: Arc<dyn InstanceDriver>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let history = EventHistory::new(config.event_history_limit);
        Self {
            config,
            registry,
            transport,
            driver,
            services: DashMap::new(),
            history: Mutex::new(history),
            actions: DashMap::new(),
            event_tx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<TransportLayer> {
        &self.transport
    }

    /// Subscribe to lifecycle and scheduler events
    pub fn subscribe(&self) -> broadcast::Receiver<HarborEventEnvelope> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, source: EventSource, event: HarborEvent) {
        let _ = self.event_tx.send(HarborEventEnvelope::new(source, event));
    }

    pub(crate) fn entry(&self, id: ServiceId) -> Result<Arc<ServiceEntry>> {
        self.services
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LifecycleError::ServiceNotFound(id))
    }

    pub(crate) fn entries(&self) -> Vec<Arc<ServiceEntry>> {
        self.services
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Take the operation lock or report the phase that holds it
    pub(crate) async fn acquire<'a>(&self, entry: &'a ServiceEntry) -> Result<MutexGuard<'a, ()>> {
        match entry.op_lock.try_lock() {
            Ok(guard) => Ok(guard),
            Err(_) => Err(LifecycleError::OperationInProgress {
                service_id: entry.id,
                phase: entry.phase().await,
            }),
        }
    }

    pub(crate) fn context(
        &self,
        entry: &Arc<ServiceEntry>,
        registration: ServiceRegistration,
        phase: Phase,
        cancel: CancellationToken,
    ) -> OperationContext {
        OperationContext::new(
            Arc::clone(entry),
            Arc::clone(&self.driver),
            Arc::clone(&self.transport),
            self.event_tx.clone(),
            registration,
            phase,
            cancel,
            self.config.start_timeout,
            self.config.health_poll_interval,
        )
    }

    fn record(&self, event: LifecycleEvent) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    // ═══════════════════════════════════════════════════════════════════
    // PHASE STATE MACHINE
    // ═══════════════════════════════════════════════════════════════════

    /// Move a service to `to`, recording the transition
    pub(crate) async fn transition(
        &self,
        entry: &ServiceEntry,
        to: Phase,
        error: Option<String>,
    ) -> Result<Phase> {
        let from = {
            let mut state = entry.state.write().await;
            let from = state.phase;
            if !from.can_transition_to(to) {
                return Err(LifecycleError::InvalidTransition {
                    service_id: entry.id,
                    from,
                    to,
                });
            }
            state.phase = to;

            let mut event = LifecycleEvent::new(entry.id, to, Some(from));
            if let Some(reason) = &error {
                event = event.with_error(reason.clone());
            }
            self.record(event);
            from
        };

        info!(service_id = %entry.id, %from, %to, "Phase changed");
        self.emit(
            EventSource::Lifecycle,
            HarborEvent::PhaseChanged {
                service_id: entry.id,
                from: Some(from),
                to,
                error,
            },
        );
        Ok(from)
    }

    /// Move a service to `Error` after a failed operation and flag it in
    /// the registry
    pub(crate) async fn fail(&self, entry: &ServiceEntry, error: &LifecycleError) {
        let reason = error.to_string();
        warn!(service_id = %entry.id, error = %reason, "Lifecycle operation failed");

        if let Err(e) = self
            .transition(entry, Phase::Error, Some(reason.clone()))
            .await
        {
            debug!(service_id = %entry.id, error = %e, "Error transition skipped");
        }
        if let Err(e) = self.registry.mark_error(entry.id, &reason).await {
            debug!(service_id = %entry.id, error = %e, "Registry not flagged");
        }
    }

    async fn mark_registry_active(&self, id: ServiceId) {
        if let Err(e) = self.registry.mark_active(id).await {
            warn!(service_id = %id, error = %e, "Registry entry not activated");
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // REGISTRATION
    // ═══════════════════════════════════════════════════════════════════

    /// Take a cataloged service under management and start it
    ///
    /// The registration must already exist in the registry. A service whose
    /// previous incarnation stopped (`Inactive`) may be registered again.
    #[instrument(skip(self, registration, scaling, update), fields(service_id = %registration.id))]
    pub async fn register_service(
        &self,
        registration: ServiceRegistration,
        scaling: Option<ScalingConfig>,
        update: Option<UpdateConfig>,
    ) -> Result<()> {
        let id = registration.id;
        let scaling = scaling.unwrap_or_default();
        scaling
            .validate()
            .map_err(|source| LifecycleError::InvalidConfig {
                service_id: id,
                source,
            })?;
        let update = update.unwrap_or_default();
        update
            .validate()
            .map_err(|source| LifecycleError::InvalidConfig {
                service_id: id,
                source,
            })?;
        registration
            .validate()
            .map_err(|e| LifecycleError::InvalidRegistration {
                service_id: id,
                reason: e.to_string(),
            })?;

        let cataloged = self.registry.get_service(id)?;
        if cataloged.status == ServiceStatus::Inactive {
            return Err(RegistryError::NotFound(id).into());
        }

        let previous = match self.entry(id) {
            Ok(existing) => {
                let phase = existing.phase().await;
                if !phase.can_transition_to(Phase::Initializing) {
                    return Err(LifecycleError::AlreadyRegistered {
                        service_id: id,
                        phase,
                    });
                }
                Some(phase)
            }
            Err(_) => None,
        };

        self.services.insert(
            id,
            Arc::new(ServiceEntry::new(ServiceState::new(
                registration,
                scaling,
                update,
            ))),
        );
        self.record(LifecycleEvent::new(id, Phase::Initializing, previous));
        self.emit(
            EventSource::Lifecycle,
            HarborEvent::PhaseChanged {
                service_id: id,
                from: previous,
                to: Phase::Initializing,
                error: None,
            },
        );
        info!(service_id = %id, "Service under lifecycle management");

        self.start_service(id).await
    }

    /// Drop a stopped service from management
    pub async fn forget_service(&self, id: ServiceId) -> Result<()> {
        let entry = self.entry(id)?;
        let _guard = self.acquire(&entry).await?;
        let phase = entry.phase().await;
        if phase != Phase::Inactive {
            return Err(LifecycleError::InvalidTransition {
                service_id: id,
                from: phase,
                to: Phase::Inactive,
            });
        }
        self.services.remove(&id);
        info!(service_id = %id, "Service released from lifecycle management");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // START / STOP
    // ═══════════════════════════════════════════════════════════════════

    /// Provision `min_instances` and wait for them to turn healthy
    ///
    /// On a running service this only tops the pool up to the minimum.
    #[instrument(skip(self), fields(service_id = %id))]
    pub async fn start_service(&self, id: ServiceId) -> Result<()> {
        let entry = self.entry(id)?;
        let _guard = self.acquire(&entry).await?;
        let snapshot = entry.snapshot().await;
        let min = snapshot.scaling.min_instances as usize;

        if snapshot.phase == Phase::Running {
            let missing = min.saturating_sub(snapshot.instances.len());
            if missing == 0 {
                debug!(service_id = %id, "Service already running");
                return Ok(());
            }
            let cancel = entry.fresh_token().await;
            let ctx = self.context(&entry, snapshot.registration, Phase::Running, cancel);
            let result: Result<()> = async {
                let created = ctx.create_instances(missing).await?;
                ctx.wait_for_healthy(&created).await
            }
            .await;
            if let Err(e) = result {
                self.fail(&entry, &e).await;
                return Err(e);
            }
            return Ok(());
        }

        self.transition(&entry, Phase::Starting, None).await?;
        let cancel = entry.fresh_token().await;
        let ctx = self.context(&entry, snapshot.registration, Phase::Starting, cancel);

        match self.provision(&ctx, min).await {
            Ok(()) => {
                self.transition(&entry, Phase::Running, None).await?;
                self.mark_registry_active(id).await;
                let instances = ctx.instance_count().await;
                info!(service_id = %id, instances, "Service started");
                Ok(())
            }
            Err(e) => {
                self.fail(&entry, &e).await;
                Err(e)
            }
        }
    }

    /// Replace leftovers known to be unhealthy, then fill the pool to `min`
    async fn provision(&self, ctx: &OperationContext, min: usize) -> Result<()> {
        let existing: Vec<InstanceId> = ctx.instances().await.iter().map(|i| i.id).collect();
        ctx.refresh(&existing).await;

        let unhealthy: Vec<InstanceId> = ctx
            .instances()
            .await
            .iter()
            .filter(|instance| instance.health == InstanceHealth::Unhealthy)
            .map(|instance| instance.id)
            .collect();
        ctx.terminate_all(&unhealthy).await?;

        let mut pool: Vec<InstanceId> = ctx.instances().await.iter().map(|i| i.id).collect();
        let missing = min.saturating_sub(pool.len());
        pool.extend(ctx.create_instances(missing).await?);
        ctx.wait_for_healthy(&pool).await
    }

    /// Stop a service, optionally draining its instances first
    ///
    /// Stopping an already stopped service succeeds without side effects.
    #[instrument(skip(self), fields(service_id = %id))]
    pub async fn stop_service(&self, id: ServiceId, graceful: bool) -> Result<()> {
        let entry = self.entry(id)?;
        let _guard = self.acquire(&entry).await?;

        if entry.phase().await == Phase::Inactive {
            debug!(service_id = %id, "Service already stopped");
            return Ok(());
        }

        self.transition(&entry, Phase::Stopping, None).await?;
        let cancel = entry.fresh_token().await;
        let registration = entry.state.read().await.registration.clone();

        match self.shut_down_pool(&entry, registration, cancel, graceful).await {
            Ok(()) => {
                info!(service_id = %id, graceful, "Service stopped");
                Ok(())
            }
            Err(e) => {
                self.fail(&entry, &e).await;
                Err(e)
            }
        }
    }

    async fn shut_down_pool(
        &self,
        entry: &Arc<ServiceEntry>,
        registration: ServiceRegistration,
        cancel: CancellationToken,
        graceful: bool,
    ) -> Result<()> {
        let ids: Vec<InstanceId> = entry.instances().await.iter().map(|i| i.id).collect();

        if graceful && !ids.is_empty() {
            let ctx = self.context(entry, registration.clone(), Phase::Stopping, cancel.clone());
            for id in &ids {
                ctx.drain_instance(*id).await?;
            }
            debug!(
                service_id = %entry.id,
                grace_ms = self.config.grace_period.as_millis() as u64,
                "Waiting for instances to drain"
            );
            ctx.pause(self.config.grace_period).await?;
        }

        self.transition(entry, Phase::Terminating, None).await?;
        let ctx = self.context(entry, registration, Phase::Terminating, cancel);
        ctx.terminate_all(&ids).await?;
        self.transition(entry, Phase::Inactive, None).await?;
        Ok(())
    }

    /// Graceful stop followed by start
    pub async fn restart_service(&self, id: ServiceId) -> Result<()> {
        self.stop_service(id, true).await?;
        self.start_service(id).await
    }

    /// Interrupt the operation running on a service
    ///
    /// Returns whether an operation was in progress.
    pub async fn cancel_operation(&self, id: ServiceId) -> Result<bool> {
        let entry = self.entry(id)?;
        let busy = entry.op_lock.try_lock().is_err();
        entry.state.read().await.cancel.cancel();
        if busy {
            info!(service_id = %id, "Operation cancelled");
        }
        Ok(busy)
    }

    // ═══════════════════════════════════════════════════════════════════
    // SCALING
    // ═══════════════════════════════════════════════════════════════════

    /// Grow or shrink the pool to `target` instances
    #[instrument(skip(self), fields(service_id = %id))]
    pub async fn scale_service(&self, id: ServiceId, target: u32) -> Result<()> {
        let entry = self.entry(id)?;
        let _guard = self.acquire(&entry).await?;
        let snapshot = entry.snapshot().await;

        if !snapshot.scaling.contains(target) {
            return Err(LifecycleError::OutOfBounds {
                service_id: id,
                phase: snapshot.phase,
                target,
                min: snapshot.scaling.min_instances,
                max: snapshot.scaling.max_instances,
            });
        }

        self.scale_locked(&entry, snapshot, target as usize).await?;
        Ok(())
    }

    /// Scale with the operation lock already held; returns the previous count
    pub(crate) async fn scale_locked(
        &self,
        entry: &Arc<ServiceEntry>,
        snapshot: ServiceState,
        target: usize,
    ) -> Result<usize> {
        let from = snapshot.instances.len();
        self.transition(entry, Phase::Scaling, None).await?;
        let cancel = entry.fresh_token().await;
        let ctx = self.context(entry, snapshot.registration.clone(), Phase::Scaling, cancel);

        let result: Result<()> = async {
            if target > from {
                let created = ctx.create_instances(target - from).await?;
                ctx.wait_for_healthy(&created).await?;
            } else if target < from {
                for id in snapshot.scale_down_order().into_iter().take(from - target) {
                    ctx.retire_instance(id).await?;
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.fail(entry, &e).await;
            return Err(e);
        }

        {
            let mut state = entry.state.write().await;
            let now = tokio::time::Instant::now();
            if target > from {
                state.last_scale_up = Some(now);
            } else if target < from {
                state.last_scale_down = Some(now);
            }
        }
        self.transition(entry, Phase::Running, None).await?;

        info!(service_id = %entry.id, from, to = target, "Service scaled");
        self.emit(
            EventSource::Lifecycle,
            HarborEvent::ServiceScaled {
                service_id: entry.id,
                from,
                to: target,
            },
        );
        Ok(from)
    }

    // ═══════════════════════════════════════════════════════════════════
    // UPDATES
    // ═══════════════════════════════════════════════════════════════════

    /// Move the pool to `registration` using `strategy` (or the stored one)
    ///
    /// On failure the service ends in `Error`; with `rollback_on_failure`
    /// the previous registration is re-applied through a recreate and the
    /// original failure is still returned.
    #[instrument(skip(self, registration), fields(service_id = %id, version = %registration.metadata.version))]
    pub async fn update_service(
        &self,
        id: ServiceId,
        registration: ServiceRegistration,
        strategy: Option<UpdateStrategy>,
    ) -> Result<()> {
        if registration.id != id {
            return Err(LifecycleError::InvalidRegistration {
                service_id: id,
                reason: format!("registration belongs to {}", registration.id),
            });
        }
        registration
            .validate()
            .map_err(|e| LifecycleError::InvalidRegistration {
                service_id: id,
                reason: e.to_string(),
            })?;

        let entry = self.entry(id)?;
        let _guard = self.acquire(&entry).await?;
        let snapshot = entry.snapshot().await;
        let strategy = strategy.unwrap_or(snapshot.update.strategy);
        let update = snapshot.update.clone();
        let previous = snapshot.registration.clone();
        let desired = (snapshot.instances.len() as u32)
            .clamp(snapshot.scaling.min_instances, snapshot.scaling.max_instances)
            as usize;

        self.transition(&entry, Phase::Updating, None).await?;
        let cancel = entry.fresh_token().await;
        let ctx = self.context(&entry, registration.clone(), Phase::Updating, cancel);
        let executor = create_executor(strategy, &update);

        info!(
            service_id = %id,
            strategy = executor.name(),
            from_version = %previous.metadata.version,
            to_version = %registration.metadata.version,
            desired,
            "Starting update"
        );

        let result = self
            .run_executor(
                executor.as_ref(),
                snapshot.instances,
                desired,
                &ctx,
                update.rollout_timeout,
            )
            .await;

        match result {
            Ok(outcome) => {
                entry.state.write().await.registration = registration.clone();
                self.transition(&entry, Phase::Running, None).await?;
                self.sync_registry(&registration).await;

                info!(
                    service_id = %id,
                    created = outcome.created,
                    terminated = outcome.terminated,
                    "Update complete"
                );
                self.emit(
                    EventSource::Lifecycle,
                    HarborEvent::ServiceUpdated {
                        service_id: id,
                        strategy,
                        from_version: previous.metadata.version,
                        to_version: registration.metadata.version,
                    },
                );
                Ok(())
            }
            Err(e) => {
                self.fail(&entry, &e).await;
                self.emit(
                    EventSource::Lifecycle,
                    HarborEvent::UpdateFailed {
                        service_id: id,
                        strategy,
                        reason: e.to_string(),
                    },
                );
                if update.rollback_on_failure {
                    self.rollback(&entry, previous, desired, update.rollout_timeout)
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn run_executor(
        &self,
        executor: &dyn UpdateExecutor,
        current: Vec<ServiceInstance>,
        desired: usize,
        ctx: &OperationContext,
        timeout: Duration,
    ) -> Result<UpdateOutcome> {
        match tokio::time::timeout(timeout, executor.execute(current, desired, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(LifecycleError::Timeout {
                service_id: ctx.service_id(),
                phase: ctx.phase(),
                operation: format!("{} rollout", executor.name()),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Re-apply `previous` through a recreate; returns whether it succeeded
    async fn rollback(
        &self,
        entry: &Arc<ServiceEntry>,
        previous: ServiceRegistration,
        desired: usize,
        timeout: Duration,
    ) -> bool {
        let to_version = previous.metadata.version.clone();
        warn!(service_id = %entry.id, %to_version, "Rolling back");
        self.emit(
            EventSource::Lifecycle,
            HarborEvent::RollbackStarted {
                service_id: entry.id,
                to_version: to_version.clone(),
            },
        );

        let result: Result<()> = async {
            self.transition(entry, Phase::Updating, None).await?;
            let cancel = entry.fresh_token().await;
            let ctx = self.context(entry, previous.clone(), Phase::Updating, cancel);
            let current = entry.instances().await;
            self.run_executor(&RecreateExecutor::new(), current, desired, &ctx, timeout)
                .await?;
            entry.state.write().await.registration = previous;
            self.transition(entry, Phase::Running, None).await?;
            Ok(())
        }
        .await;

        let success = match result {
            Ok(()) => {
                self.mark_registry_active(entry.id).await;
                info!(service_id = %entry.id, %to_version, "Rollback complete");
                true
            }
            Err(e) => {
                self.fail(entry, &e).await;
                false
            }
        };
        self.emit(
            EventSource::Lifecycle,
            HarborEvent::RollbackCompleted {
                service_id: entry.id,
                to_version,
                success,
            },
        );
        success
    }

    /// Push the new metadata and configuration into the catalog and clear
    /// any error flag
    async fn sync_registry(&self, registration: &ServiceRegistration) {
        let id = registration.id;
        if let Err(e) = self
            .registry
            .update_metadata(id, MetadataUpdate::from(registration.metadata.clone()))
            .await
        {
            warn!(service_id = %id, error = %e, "Registry metadata not updated");
        }
        if let Err(e) = self
            .registry
            .update_configuration(
                id,
                ConfigurationUpdate::from(registration.configuration.clone()),
            )
            .await
        {
            warn!(service_id = %id, error = %e, "Registry configuration not updated");
        }
        self.mark_registry_active(id).await;
    }

    // ═══════════════════════════════════════════════════════════════════
    // POLICIES
    // ═══════════════════════════════════════════════════════════════════

    pub async fn set_scaling_config(&self, id: ServiceId, scaling: ScalingConfig) -> Result<()> {
        scaling
            .validate()
            .map_err(|source| LifecycleError::InvalidConfig {
                service_id: id,
                source,
            })?;
        let entry = self.entry(id)?;
        entry.state.write().await.scaling = scaling;
        info!(service_id = %id, "Scaling policy replaced");
        Ok(())
    }

    pub async fn set_update_config(&self, id: ServiceId, update: UpdateConfig) -> Result<()> {
        update
            .validate()
            .map_err(|source| LifecycleError::InvalidConfig {
                service_id: id,
                source,
            })?;
        let entry = self.entry(id)?;
        entry.state.write().await.update = update;
        info!(service_id = %id, "Update policy replaced");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════

    /// Services under management
    pub fn managed_services(&self) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self.services.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub async fn get_phase(&self, id: ServiceId) -> Result<Phase> {
        Ok(self.entry(id)?.phase().await)
    }

    /// Snapshot of the instance pool, oldest first
    pub async fn get_service_instances(&self, id: ServiceId) -> Result<Vec<ServiceInstance>> {
        Ok(self.entry(id)?.instances().await)
    }

    pub async fn get_service_status(&self, id: ServiceId) -> Result<ServiceStatusReport> {
        let entry = self.entry(id)?;
        let operation_in_progress = entry.op_lock.try_lock().is_err();
        let state = entry.snapshot().await;

        let mut versions = BTreeMap::new();
        for instance in &state.instances {
            *versions.entry(instance.version.clone()).or_insert(0) += 1;
        }
        let last_event = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_for(id);

        Ok(ServiceStatusReport {
            service_id: id,
            name: state.registration.metadata.name.clone(),
            version: state.registration.metadata.version.clone(),
            phase: state.phase,
            instances: state.instances.len(),
            healthy_instances: state.healthy_count(),
            versions,
            scaling: state.scaling,
            update: state.update,
            operation_in_progress,
            last_event,
        })
    }

    /// Phase transitions, newest last; `limit` keeps the most recent
    pub fn get_lifecycle_events(
        &self,
        id: Option<ServiceId>,
        limit: Option<usize>,
    ) -> Vec<LifecycleEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .query(id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::InMemoryInstanceDriver;
    use harbor_registry::{RegistryConfig, StaticProbe};
    use harbor_transport::TransportLayerConfig;
    use harbor_types::{
        Endpoint, ErrorKind, InstancePhase, ServiceConfiguration, ServiceMetadata, ServiceType,
    };

    async fn setup() -> (LifecycleManager, ServiceRegistration) {
        let registry = Arc::new(ServiceRegistry::new(
            RegistryConfig::default(),
            Arc::new(StaticProbe::reachable()),
        ));
        let transport =
            Arc::new(TransportLayer::from_config(TransportLayerConfig::default()).unwrap());
        let config = LifecycleConfig {
            start_timeout: Duration::from_millis(200),
            health_poll_interval: Duration::from_millis(5),
            grace_period: Duration::ZERO,
            ..Default::default()
        };
        let manager = LifecycleManager::new(
            config,
            Arc::clone(&registry),
            transport,
            Arc::new(InMemoryInstanceDriver::new()),
        );
        let id = registry
            .register_service(
                ServiceType::Tool,
                ServiceMetadata::new("worker", "1.0.0"),
                ServiceConfiguration::default(),
                vec![Endpoint::new("http://worker.local:80")],
            )
            .await
            .unwrap();
        let registration = registry.get_service(id).unwrap();
        (manager, registration)
    }

    #[tokio::test]
    async fn register_requires_catalog_entry() {
        let (manager, mut registration) = setup().await;
        registration.id = ServiceId::generate();

        let err = manager
            .register_service(registration, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn register_rejects_invalid_policy() {
        let (manager, registration) = setup().await;
        let id = registration.id;

        let err = manager
            .register_service(registration, Some(ScalingConfig::new(5, 2)), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.service_id(), Some(id));
        assert!(manager.get_phase(id).await.is_err());
    }

    #[tokio::test]
    async fn register_twice_conflicts_until_stopped() {
        let (manager, registration) = setup().await;
        let id = registration.id;
        manager
            .register_service(registration.clone(), None, None)
            .await
            .unwrap();

        let err = manager
            .register_service(registration.clone(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert_eq!(err.phase(), Some(Phase::Running));

        manager.stop_service(id, false).await.unwrap();
        manager
            .register_service(registration, None, None)
            .await
            .unwrap();
        assert_eq!(manager.get_phase(id).await.unwrap(), Phase::Running);
    }

    #[tokio::test]
    async fn busy_service_rejects_concurrent_operation() {
        let (manager, registration) = setup().await;
        let id = registration.id;
        manager
            .register_service(registration, None, None)
            .await
            .unwrap();

        let entry = manager.entry(id).unwrap();
        let _held = entry.op_lock.try_lock().unwrap();

        let err = manager.scale_service(id, 1).await.unwrap_err();
        assert!(matches!(err, LifecycleError::OperationInProgress { .. }));
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert!(manager.get_service_status(id).await.unwrap().operation_in_progress);
    }

    #[tokio::test]
    async fn status_report_counts_versions() {
        let (manager, registration) = setup().await;
        let id = registration.id;
        manager
            .register_service(registration, Some(ScalingConfig::new(2, 4)), None)
            .await
            .unwrap();

        let status = manager.get_service_status(id).await.unwrap();
        assert_eq!(status.phase, Phase::Running);
        assert_eq!(status.instances, 2);
        assert_eq!(status.healthy_instances, 2);
        assert_eq!(status.versions.get("1.0.0"), Some(&2));
        assert_eq!(status.last_event.map(|e| e.phase), Some(Phase::Running));
    }

    #[tokio::test]
    async fn transitions_record_previous_phase() {
        let (manager, registration) = setup().await;
        let id = registration.id;
        manager
            .register_service(registration, None, None)
            .await
            .unwrap();
        manager.stop_service(id, false).await.unwrap();

        let phases: Vec<(Option<Phase>, Phase)> = manager
            .get_lifecycle_events(Some(id), None)
            .iter()
            .map(|e| (e.previous_phase, e.phase))
            .collect();
        assert_eq!(
            phases,
            vec![
                (None, Phase::Initializing),
                (Some(Phase::Initializing), Phase::Starting),
                (Some(Phase::Starting), Phase::Running),
                (Some(Phase::Running), Phase::Stopping),
                (Some(Phase::Stopping), Phase::Terminating),
                (Some(Phase::Terminating), Phase::Inactive),
            ]
        );
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn operation_futures_can_be_spawned() {
        let (manager, registration) = setup().await;
        let id = registration.id;

        let start = manager.start_service(id);
        assert_send(&start);
        drop(start);
        let stop = manager.stop_service(id, true);
        assert_send(&stop);
        drop(stop);
        let scale = manager.scale_service(id, 2);
        assert_send(&scale);
        drop(scale);
        let restart = manager.restart_service(id);
        assert_send(&restart);
        drop(restart);
        let register = manager.register_service(registration, None, None);
        assert_send(&register);
    }

    #[tokio::test]
    async fn reregistration_continues_phase_history() {
        let (manager, registration) = setup().await;
        let id = registration.id;
        manager
            .register_service(registration.clone(), None, None)
            .await
            .unwrap();
        manager.stop_service(id, false).await.unwrap();
        manager
            .register_service(registration, None, None)
            .await
            .unwrap();

        let events = manager.get_lifecycle_events(Some(id), None);
        assert_eq!(events[0].previous_phase, None);
        let mut actual = None;
        for event in &events {
            assert_eq!(event.previous_phase, actual, "at {}", event.phase);
            if let Some(previous) = event.previous_phase {
                assert!(previous.can_transition_to(event.phase));
            }
            actual = Some(event.phase);
        }

        let reentry = events
            .iter()
            .filter(|e| e.phase == Phase::Initializing)
            .nth(1)
            .unwrap();
        assert_eq!(reentry.previous_phase, Some(Phase::Inactive));
        assert_eq!(manager.get_phase(id).await.unwrap(), Phase::Running);
    }

    #[tokio::test]
    async fn failed_drain_keeps_instances_serving() {
        let (manager, registration) = setup().await;
        let id = registration.id;
        manager
            .register_service(registration, Some(ScalingConfig::new(2, 4)), None)
            .await
            .unwrap();

        // No transport backend, so the drain signal cannot be delivered
        let err = manager.stop_service(id, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(manager.get_phase(id).await.unwrap(), Phase::Error);

        let phases = |instances: Vec<ServiceInstance>| {
            instances.iter().map(|i| i.phase).collect::<Vec<_>>()
        };
        assert_eq!(
            phases(manager.get_service_instances(id).await.unwrap()),
            vec![InstancePhase::Running; 2]
        );

        manager.start_service(id).await.unwrap();
        assert_eq!(manager.get_phase(id).await.unwrap(), Phase::Running);
        assert_eq!(
            phases(manager.get_service_instances(id).await.unwrap()),
            vec![InstancePhase::Running; 2]
        );
    }

    #[tokio::test]
    async fn update_rejects_foreign_registration() {
        let (manager, registration) = setup().await;
        let id = registration.id;
        manager
            .register_service(registration.clone(), None, None)
            .await
            .unwrap();

        let mut other = registration;
        other.id = ServiceId::generate();
        let err = manager.update_service(id, other, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(manager.get_phase(id).await.unwrap(), Phase::Running);
    }
}
