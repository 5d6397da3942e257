//! The service registry
//!
//! Records live in a `DashMap` so reads never wait on writers. Writers take
//! the index lock first, which serializes catalog mutations and keeps the
//! status/type buckets in step with the stored records. Endpoint probes run
//! outside every lock.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::hooks::{NoopHooks, RegistryHooks};
use crate::index::{IndexViolation, RegistryIndex};
use crate::probe::{probe_endpoints, HealthProbe, ProbeOutcome};
use crate::search::{self, SearchFilter, SearchOptions, SearchResult};
use crate::stats::RegistryStatistics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use harbor_types::{
    ConfigurationUpdate, Endpoint, EventSource, HarborEvent, HarborEventEnvelope, HealthState,
    MetadataUpdate, ServiceConfiguration, ServiceHealth, ServiceId, ServiceMetadata,
    ServiceRegistration, ServiceStatistics, ServiceStatus, ServiceType,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Services removed by one cleanup sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Past their explicit `expires_at`
    pub expired: Vec<ServiceId>,
    /// Inactive tombstones past the retention window
    pub evicted: Vec<ServiceId>,
}

/// In-memory service catalog with health tracking
pub struct ServiceRegistry {
    config: RegistryConfig,
    services: DashMap<ServiceId, ServiceRegistration>,
    index: RwLock<RegistryIndex>,
    probe: Arc<dyn HealthProbe>,
    hooks: Arc<dyn RegistryHooks>,
    event_tx: broadcast::Sender<HarborEventEnvelope>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceRegistry {
    /// Create an empty registry checking endpoints with `probe`
    pub fn new(config: RegistryConfig, probe: Arc<dyn HealthProbe>) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            services: DashMap::new(),
            index: RwLock::new(RegistryIndex::new()),
            probe,
            hooks: Arc::new(NoopHooks),
            event_tx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Replace the no-op registration hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn RegistryHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Registry settings
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Probe used for registration endpoints
    pub fn probe(&self) -> Arc<dyn HealthProbe> {
        Arc::clone(&self.probe)
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<HarborEventEnvelope> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: HarborEvent) {
        let _ = self
            .event_tx
            .send(HarborEventEnvelope::new(EventSource::Registry, event));
    }

    // ═══════════════════════════════════════════════════════════════════
    // REGISTRATION
    // ═══════════════════════════════════════════════════════════════════

    /// Validate and store a service, run its first health check, activate it
    #[instrument(skip(self, metadata, configuration, endpoints), fields(name = %metadata.name))]
    pub async fn register_service(
        &self,
        service_type: ServiceType,
        metadata: ServiceMetadata,
        configuration: ServiceConfiguration,
        endpoints: Vec<Endpoint>,
    ) -> Result<ServiceId> {
        let registration =
            ServiceRegistration::new(service_type, metadata, configuration, endpoints);
        registration.validate()?;
        let id = registration.id;

        {
            let mut index = self.index.write().await;
            let live = self
                .services
                .len()
                .saturating_sub(index.count_status(ServiceStatus::Inactive));
            if live >= self.config.max_services {
                return Err(RegistryError::Capacity {
                    capacity: self.config.max_services,
                });
            }
            index.insert(id, ServiceStatus::Registering, service_type);
            self.services.insert(id, registration.clone());
        }

        info!(
            service_id = %id,
            version = %registration.metadata.version,
            "Service registered"
        );
        self.emit(HarborEvent::ServiceRegistered {
            service_id: id,
            name: registration.metadata.name,
            version: registration.metadata.version,
            service_type,
        });

        self.check_health(id).await?;
        self.transition(id, ServiceStatus::Active).await?;
        Ok(id)
    }

    /// Run cleanup hooks and leave an `Inactive` tombstone
    #[instrument(skip(self), fields(service_id = %id))]
    pub async fn unregister_service(&self, id: ServiceId) -> Result<()> {
        self.transition(id, ServiceStatus::Unregistering).await?;

        let snapshot = self.get_service(id)?;
        if let Err(reason) = self.hooks.on_unregister(&snapshot).await {
            warn!(service_id = %id, %reason, "Unregister hook failed");
        }

        self.transition(id, ServiceStatus::Inactive).await?;
        info!(service_id = %id, "Service unregistered");
        self.emit(HarborEvent::ServiceUnregistered { service_id: id });
        Ok(())
    }

    /// Shallow-merge a configuration update
    #[instrument(skip(self, update), fields(service_id = %id))]
    pub async fn update_configuration(
        &self,
        id: ServiceId,
        update: ConfigurationUpdate,
    ) -> Result<ServiceRegistration> {
        let snapshot = {
            let _index = self.index.write().await;
            let mut entry = self.live_entry_mut(id)?;
            let mut configuration = entry.configuration.clone();
            configuration.merge(update);
            configuration.validate()?;
            entry.configuration = configuration;
            entry.updated_at = Utc::now();
            entry.clone()
        };

        debug!(service_id = %id, "Configuration updated");
        self.emit(HarborEvent::ServiceConfigurationUpdated { service_id: id });
        Ok(snapshot)
    }

    /// Shallow-merge a metadata update
    #[instrument(skip(self, update), fields(service_id = %id))]
    pub async fn update_metadata(
        &self,
        id: ServiceId,
        update: MetadataUpdate,
    ) -> Result<ServiceRegistration> {
        let snapshot = {
            let _index = self.index.write().await;
            let mut entry = self.live_entry_mut(id)?;
            let mut metadata = entry.metadata.clone();
            metadata.merge(update);
            metadata.validate()?;
            entry.metadata = metadata;
            entry.updated_at = Utc::now();
            entry.clone()
        };

        debug!(service_id = %id, version = %snapshot.metadata.version, "Metadata updated");
        self.emit(HarborEvent::ServiceMetadataUpdated {
            service_id: id,
            version: snapshot.metadata.version.clone(),
        });
        Ok(snapshot)
    }

    /// Record one request served by the service
    pub fn record_request(&self, id: ServiceId, latency: Duration, success: bool) -> Result<()> {
        let mut entry = self.live_entry_mut(id)?;
        entry.statistics.record(latency, success);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // STATUS TRANSITIONS
    // ═══════════════════════════════════════════════════════════════════

    /// Mark an active service deprecated; it drops out of default search
    pub async fn deprecate_service(&self, id: ServiceId) -> Result<()> {
        self.transition(id, ServiceStatus::Deprecated).await
    }

    /// Move a deprecated or errored service back to `Active`
    pub async fn reactivate_service(&self, id: ServiceId) -> Result<()> {
        let from = self.get_service(id)?.status;
        if !matches!(from, ServiceStatus::Deprecated | ServiceStatus::Error) {
            return Err(RegistryError::InvalidTransition {
                service_id: id,
                from,
                to: ServiceStatus::Active,
            });
        }
        self.transition(id, ServiceStatus::Active).await
    }

    /// Mark a service active; no-op when it already is
    pub async fn mark_active(&self, id: ServiceId) -> Result<()> {
        if self.get_service(id)?.status == ServiceStatus::Active {
            return Ok(());
        }
        self.transition(id, ServiceStatus::Active).await
    }

    /// Mark a service errored; no-op when it already is
    pub async fn mark_error(&self, id: ServiceId, reason: &str) -> Result<()> {
        if self.get_service(id)?.status == ServiceStatus::Error {
            return Ok(());
        }
        warn!(service_id = %id, %reason, "Service marked as error");
        self.transition(id, ServiceStatus::Error).await
    }

    async fn transition(&self, id: ServiceId, to: ServiceStatus) -> Result<()> {
        let from = {
            let mut index = self.index.write().await;
            let mut entry = self
                .services
                .get_mut(&id)
                .ok_or(RegistryError::NotFound(id))?;
            let from = entry.status;
            if !from.can_transition_to(to) {
                return Err(RegistryError::InvalidTransition {
                    service_id: id,
                    from,
                    to,
                });
            }

            let now = Utc::now();
            entry.status = to;
            entry.updated_at = now;
            if to == ServiceStatus::Inactive {
                entry.unregistered_at = Some(now);
            }
            index.move_status(id, from, to);
            from
        };

        debug!(service_id = %id, %from, %to, "Service status changed");
        self.emit(HarborEvent::ServiceStatusChanged {
            service_id: id,
            from,
            to,
        });
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════════

    /// Snapshot of one registration, tombstones included
    pub fn get_service(&self, id: ServiceId) -> Result<ServiceRegistration> {
        self.services
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Every stored record, tombstones included
    pub fn get_all_services(&self) -> Vec<ServiceRegistration> {
        self.services
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Filter, sort and page the catalog
    pub fn search_services(&self, filter: &SearchFilter, options: &SearchOptions) -> SearchResult {
        search::run(
            self.services.iter().map(|entry| entry.value().clone()),
            filter,
            options,
        )
    }

    /// Last health record of a service
    pub fn get_service_health(&self, id: ServiceId) -> Result<ServiceHealth> {
        self.services
            .get(&id)
            .map(|entry| entry.health.clone())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Request counters of a service
    pub fn get_service_statistics(&self, id: ServiceId) -> Result<ServiceStatistics> {
        self.services
            .get(&id)
            .map(|entry| entry.statistics.clone())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Aggregate counts over every stored registration
    pub fn get_registry_statistics(&self) -> RegistryStatistics {
        let snapshot = self.get_all_services();
        RegistryStatistics::collect(&snapshot)
    }

    /// Cross-check the status/type indexes against the stored records
    pub async fn validate(&self) -> Vec<IndexViolation> {
        let index = self.index.read().await;
        index.validate(
            self.services
                .iter()
                .map(|entry| (*entry.key(), entry.status, entry.service_type)),
        )
    }

    fn live_entry_mut(
        &self,
        id: ServiceId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, ServiceId, ServiceRegistration>> {
        match self.services.get_mut(&id) {
            Some(entry) if entry.status != ServiceStatus::Inactive => Ok(entry),
            _ => Err(RegistryError::NotFound(id)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // HEALTH
    // ═══════════════════════════════════════════════════════════════════

    /// Probe a service's endpoints now
    #[instrument(skip(self), fields(service_id = %id))]
    pub async fn trigger_health_check(&self, id: ServiceId) -> Result<ServiceHealth> {
        self.check_health(id).await
    }

    async fn check_health(&self, id: ServiceId) -> Result<ServiceHealth> {
        let (endpoints, timeout, error_rate, previous) = {
            let entry = self.live_entry_mut(id)?;
            (
                entry.endpoints.clone(),
                entry.configuration.timeout,
                entry.statistics.error_rate(),
                entry.health.clone(),
            )
        };

        let outcomes = probe_endpoints(self.probe.as_ref(), &endpoints, timeout).await;
        let health = evaluate_health(
            &previous,
            &outcomes,
            error_rate,
            self.config.degraded_error_rate,
            Utc::now(),
        );

        {
            let mut entry = self.live_entry_mut(id)?;
            entry.health = health.clone();
        }

        if health.state != previous.state {
            info!(
                service_id = %id,
                from = ?previous.state,
                to = ?health.state,
                "Service health changed"
            );
        }
        self.emit(HarborEvent::HealthCheckCompleted {
            service_id: id,
            previous: previous.state,
            current: health.state,
            response_time_ms: health.response_time.map(|d| d.as_millis() as u64),
        });
        Ok(health)
    }

    /// Check every `Active` service once; returns how many were probed
    pub async fn run_health_sweep(&self) -> usize {
        let ids = self.index.read().await.ids_with_status(ServiceStatus::Active);
        let results = join_all(ids.iter().map(|id| self.check_health(*id))).await;

        let mut checked = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(_) => checked += 1,
                Err(e) => debug!(service_id = %id, error = %e, "Skipped health check"),
            }
        }
        checked
    }

    // ═══════════════════════════════════════════════════════════════════
    // CLEANUP
    // ═══════════════════════════════════════════════════════════════════

    /// Evict expired registrations and stale tombstones
    pub async fn run_cleanup(&self) -> CleanupReport {
        let now = Utc::now();
        let mut report = CleanupReport::default();
        let mut expired_snapshots = Vec::new();

        for entry in self.services.iter() {
            if entry.is_expired(now) {
                report.expired.push(*entry.key());
                if entry.status != ServiceStatus::Inactive {
                    expired_snapshots.push(entry.value().clone());
                }
            } else if entry.status == ServiceStatus::Inactive
                && retention_elapsed(entry.unregistered_at, now, self.config.inactive_retention)
            {
                report.evicted.push(*entry.key());
            }
        }

        for snapshot in &expired_snapshots {
            if let Err(reason) = self.hooks.on_unregister(snapshot).await {
                warn!(service_id = %snapshot.id, %reason, "Unregister hook failed");
            }
        }

        {
            let mut index = self.index.write().await;
            for id in report.expired.iter().chain(&report.evicted) {
                if let Some((_, registration)) = self.services.remove(id) {
                    index.remove(*id, registration.status, registration.service_type);
                }
            }
        }

        for id in &report.expired {
            info!(service_id = %id, "Service expired");
            self.emit(HarborEvent::ServiceExpired { service_id: *id });
        }
        for id in &report.evicted {
            debug!(service_id = %id, "Tombstone evicted");
            self.emit(HarborEvent::ServiceEvicted { service_id: *id });
        }
        report
    }

    // ═══════════════════════════════════════════════════════════════════
    // BACKGROUND TASKS
    // ═══════════════════════════════════════════════════════════════════

    /// Spawn the health and cleanup sweeps; calling twice is a no-op
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return;
        }

        let registry = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            registry.health_loop().await;
        }));

        let registry = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            registry.cleanup_loop().await;
        }));

        info!(
            health_interval_ms = self.config.health_check_interval.as_millis() as u64,
            cleanup_interval_ms = self.config.cleanup_interval.as_millis() as u64,
            "Registry background tasks started"
        );
    }

    /// Stop the background sweeps and wait for them to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Registry task ended abnormally");
            }
        }
        info!("Registry shut down");
    }

    async fn health_loop(&self) {
        let mut interval = tokio::time::interval(self.config.health_check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let checked = self.run_health_sweep().await;
                    debug!(checked, "Health sweep completed");
                }
            }
        }
    }

    async fn cleanup_loop(&self) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.run_cleanup().await;
                    if !report.expired.is_empty() || !report.evicted.is_empty() {
                        info!(
                            expired = report.expired.len(),
                            evicted = report.evicted.len(),
                            "Cleanup sweep completed"
                        );
                    }
                }
            }
        }
    }
}

fn retention_elapsed(
    unregistered_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    retention: Duration,
) -> bool {
    unregistered_at
        .and_then(|at| (now - at).to_std().ok())
        .is_some_and(|age| age >= retention)
}

/// Fold probe outcomes into the next health record.
///
/// Healthy if any endpoint answered, degraded if it answered but the error
/// rate is above `degraded_threshold`, unhealthy otherwise.
pub(crate) fn evaluate_health(
    previous: &ServiceHealth,
    outcomes: &[ProbeOutcome],
    error_rate: f64,
    degraded_threshold: f64,
    now: DateTime<Utc>,
) -> ServiceHealth {
    let reachable = outcomes.iter().any(|outcome| outcome.reachable);
    let response_time = outcomes
        .iter()
        .filter(|outcome| outcome.reachable)
        .map(|outcome| outcome.response_time)
        .min();
    let last_error = outcomes
        .iter()
        .rev()
        .find_map(|outcome| outcome.error.clone())
        .or_else(|| if reachable { None } else { previous.last_error.clone() });

    let state = match (reachable, error_rate > degraded_threshold) {
        (true, false) => HealthState::Healthy,
        (true, true) => HealthState::Degraded,
        (false, _) => HealthState::Unhealthy,
    };

    let healthy_since = if reachable {
        previous.healthy_since.or(Some(now))
    } else {
        None
    };
    let uptime = healthy_since
        .and_then(|since| (now - since).to_std().ok())
        .unwrap_or_default();

    ServiceHealth {
        state,
        last_check: Some(now),
        uptime,
        response_time,
        error_rate,
        consecutive_failures: if reachable {
            0
        } else {
            previous.consecutive_failures.saturating_add(1)
        },
        last_error,
        healthy_since,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StaticProbe;

    fn registry(probe: StaticProbe) -> ServiceRegistry {
        ServiceRegistry::new(RegistryConfig::default(), Arc::new(probe))
    }

    async fn register(registry: &ServiceRegistry, name: &str) -> Result<ServiceId> {
        registry
            .register_service(
                ServiceType::Tool,
                ServiceMetadata::new(name, "1.0.0"),
                ServiceConfiguration::default(),
                vec![Endpoint::new(format!("http://{name}.local:8080"))],
            )
            .await
    }

    #[tokio::test]
    async fn test_register_activates_and_checks_health() {
        let registry = registry(StaticProbe::reachable());
        let id = register(&registry, "alpha").await.unwrap();

        let service = registry.get_service(id).unwrap();
        assert_eq!(service.status, ServiceStatus::Active);
        assert_eq!(service.health.state, HealthState::Healthy);
        assert!(service.health.last_check.is_some());
        assert!(registry.validate().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unhealthy() {
        let registry = registry(StaticProbe::unreachable());
        let id = register(&registry, "beta").await.unwrap();

        let health = registry.get_service_health(id).unwrap();
        assert_eq!(health.state, HealthState::Unhealthy);
        assert_eq!(health.consecutive_failures, 1);
        assert!(health.last_error.is_some());
    }

    #[tokio::test]
    async fn test_capacity_rejected() {
        let config = RegistryConfig {
            max_services: 1,
            ..Default::default()
        };
        let registry = ServiceRegistry::new(config, Arc::new(StaticProbe::reachable()));
        register(&registry, "one").await.unwrap();

        let err = register(&registry, "two").await.unwrap_err();
        assert!(matches!(err, RegistryError::Capacity { capacity: 1 }));
        assert_eq!(registry.get_all_services().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_registration_is_not_stored() {
        let registry = registry(StaticProbe::reachable());
        let err = registry
            .register_service(
                ServiceType::Tool,
                ServiceMetadata::new("", "1.0.0"),
                ServiceConfiguration::default(),
                vec![Endpoint::new("http://x:1")],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), harbor_types::ErrorKind::Validation);
        assert!(registry.get_all_services().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_leaves_tombstone() {
        let registry = registry(StaticProbe::reachable());
        let id = register(&registry, "gamma").await.unwrap();
        registry.unregister_service(id).await.unwrap();

        let service = registry.get_service(id).unwrap();
        assert_eq!(service.status, ServiceStatus::Inactive);
        assert!(service.unregistered_at.is_some());
        assert!(matches!(
            registry.unregister_service(id).await,
            Err(RegistryError::InvalidTransition { .. })
        ));
        assert_eq!(
            registry
                .search_services(&SearchFilter::default(), &SearchOptions::default())
                .total,
            0
        );
    }

    #[tokio::test]
    async fn test_cleanup_evicts_after_retention() {
        let config = RegistryConfig {
            inactive_retention: Duration::ZERO,
            ..Default::default()
        };
        let registry = ServiceRegistry::new(config, Arc::new(StaticProbe::reachable()));
        let id = register(&registry, "delta").await.unwrap();
        registry.unregister_service(id).await.unwrap();

        let report = registry.run_cleanup().await;
        assert_eq!(report.evicted, vec![id]);
        assert!(matches!(
            registry.get_service(id),
            Err(RegistryError::NotFound(_))
        ));
        assert!(registry.validate().await.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_evicts_expired() {
        let registry = registry(StaticProbe::reachable());
        let id = register(&registry, "epsilon").await.unwrap();
        registry
            .update_configuration(
                id,
                ConfigurationUpdate {
                    expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let report = registry.run_cleanup().await;
        assert_eq!(report.expired, vec![id]);
        assert!(registry.get_service(id).is_err());
    }

    #[tokio::test]
    async fn test_error_rate_degrades_health() {
        let registry = registry(StaticProbe::reachable());
        let id = register(&registry, "zeta").await.unwrap();
        for success in [true, false, false] {
            registry
                .record_request(id, Duration::from_millis(5), success)
                .unwrap();
        }

        let health = registry.trigger_health_check(id).await.unwrap();
        assert_eq!(health.state, HealthState::Degraded);
        assert_eq!(registry.get_service_statistics(id).unwrap().total_requests, 3);
    }

    #[tokio::test]
    async fn test_deprecate_and_reactivate() {
        let registry = registry(StaticProbe::reachable());
        let id = register(&registry, "eta").await.unwrap();

        registry.deprecate_service(id).await.unwrap();
        assert_eq!(registry.get_service(id).unwrap().status, ServiceStatus::Deprecated);

        registry.reactivate_service(id).await.unwrap();
        assert_eq!(registry.get_service(id).unwrap().status, ServiceStatus::Active);
        assert!(registry.reactivate_service(id).await.is_err());
    }

    #[tokio::test]
    async fn test_health_sweep_checks_only_active_services() {
        let probe = Arc::new(StaticProbe::reachable());
        let registry = ServiceRegistry::new(RegistryConfig::default(), probe.clone());
        let active = register(&registry, "active").await.unwrap();
        let deprecated = register(&registry, "deprecated").await.unwrap();
        let errored = register(&registry, "errored").await.unwrap();
        registry.deprecate_service(deprecated).await.unwrap();
        registry.mark_error(errored, "crashed").await.unwrap();

        let before_deprecated = registry.get_service_health(deprecated).unwrap();
        let before_errored = registry.get_service_health(errored).unwrap();
        for name in ["active", "deprecated", "errored"] {
            probe.set_reachable(format!("http://{name}.local:8080"), false);
        }

        assert_eq!(registry.run_health_sweep().await, 1);

        let health = registry.get_service_health(active).unwrap();
        assert_eq!(health.state, HealthState::Unhealthy);
        assert_eq!(health.consecutive_failures, 1);
        assert_eq!(registry.get_service_health(deprecated).unwrap(), before_deprecated);
        assert_eq!(registry.get_service_health(errored).unwrap(), before_errored);
        assert_eq!(before_deprecated.state, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_background_cleanup_evicts_tombstone() {
        let config = RegistryConfig {
            health_check_interval: Duration::from_millis(5),
            cleanup_interval: Duration::from_millis(5),
            inactive_retention: Duration::ZERO,
            ..Default::default()
        };
        let registry = Arc::new(ServiceRegistry::new(
            config,
            Arc::new(StaticProbe::reachable()),
        ));
        let id = register(&registry, "theta").await.unwrap();
        registry.unregister_service(id).await.unwrap();
        let mut events = registry.subscribe();

        registry.start();
        registry.start();

        let evicted = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match events.recv().await {
                    Ok(envelope) => {
                        if let HarborEvent::ServiceEvicted { service_id } = envelope.event {
                            assert_eq!(service_id, id);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await;
        assert!(evicted.is_ok());
        assert!(matches!(
            registry.get_service(id),
            Err(RegistryError::NotFound(_))
        ));

        tokio::time::timeout(Duration::from_secs(2), registry.shutdown())
            .await
            .unwrap();
        assert!(registry.tasks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_evaluate_health_any_endpoint() {
        let outcomes = [
            ProbeOutcome::unreachable(Duration::from_millis(3), "refused"),
            ProbeOutcome::reachable(Duration::from_millis(7)),
        ];
        let health = evaluate_health(&ServiceHealth::default(), &outcomes, 0.0, 0.1, Utc::now());
        assert_eq!(health.state, HealthState::Healthy);
        assert_eq!(health.response_time, Some(Duration::from_millis(7)));
        assert_eq!(health.last_error.as_deref(), Some("refused"));
        assert!(health.healthy_since.is_some());
    }
}
