//! Instance drivers
//!
//! The lifecycle manager never talks to a process supervisor directly. It
//! asks an [`InstanceDriver`] to launch, check and terminate replicas and
//! keeps the resulting [`ServiceInstance`] records in its own pools.

use async_trait::async_trait;
use dashmap::DashMap;
use harbor_registry::HealthProbe;
use harbor_types::{
    Endpoint, InstanceHealth, InstanceId, ResourceUsage, ServiceId, ServiceInstance,
    ServiceRegistration,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Failure reported by a driver
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Observed state of one replica
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceReport {
    pub health: InstanceHealth,
    pub resources: ResourceUsage,
}

/// Launches, checks and terminates service replicas
#[async_trait]
pub trait InstanceDriver: Send + Sync {
    /// Driver name for logs
    fn name(&self) -> &str;

    /// Launch one replica running `registration`
    async fn launch(&self, registration: &ServiceRegistration)
        -> Result<ServiceInstance, DriverError>;

    /// Observe the current health and utilization of a replica
    async fn check(&self, instance: &ServiceInstance) -> Result<InstanceReport, DriverError>;

    /// Tear a replica down
    async fn terminate(&self, instance: &ServiceInstance) -> Result<(), DriverError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY DRIVER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct SimulatedInstance {
    service_id: ServiceId,
    version: String,
    ready_at: Instant,
    health: Option<InstanceHealth>,
}

/// Simulated replicas with controllable health, usage and launch failures
///
/// A replica reports `Unknown` until its startup delay has passed and
/// `Healthy` afterwards, unless its health was overridden or its version
/// was marked faulty.
pub struct InMemoryInstanceDriver {
    instances: DashMap<InstanceId, SimulatedInstance>,
    usage: DashMap<ServiceId, ResourceUsage>,
    startup_delay: Mutex<Duration>,
    failing_launches: AtomicU32,
    faulty_versions: Mutex<HashSet<String>>,
    launched: AtomicU64,
    terminated: AtomicU64,
}

impl InMemoryInstanceDriver {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
            usage: DashMap::new(),
            startup_delay: Mutex::new(Duration::ZERO),
            failing_launches: AtomicU32::new(0),
            faulty_versions: Mutex::new(HashSet::new()),
            launched: AtomicU64::new(0),
            terminated: AtomicU64::new(0),
        }
    }

    pub fn with_startup_delay(self, delay: Duration) -> Self {
        self.set_startup_delay(delay);
        self
    }

    pub fn set_startup_delay(&self, delay: Duration) {
        *self
            .startup_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Fail the next `count` launches
    pub fn fail_next_launches(&self, count: u32) {
        self.failing_launches.store(count, Ordering::SeqCst);
    }

    /// Replicas of `version` never turn healthy
    pub fn mark_version_faulty(&self, version: impl Into<String>) {
        self.faulty_versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(version.into());
    }

    pub fn clear_faulty_versions(&self) {
        self.faulty_versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Override the reported health of one replica
    pub fn set_health(&self, instance_id: InstanceId, health: InstanceHealth) -> bool {
        match self.instances.get_mut(&instance_id) {
            Some(mut instance) => {
                instance.health = Some(health);
                true
            }
            None => false,
        }
    }

    /// Utilization reported by every replica of a service
    pub fn set_usage(&self, service_id: ServiceId, usage: ResourceUsage) {
        self.usage.insert(service_id, usage);
    }

    pub fn is_running(&self, instance_id: InstanceId) -> bool {
        self.instances.contains_key(&instance_id)
    }

    /// Replicas of a service still running
    pub fn running_count(&self, service_id: ServiceId) -> usize {
        self.instances
            .iter()
            .filter(|entry| entry.service_id == service_id)
            .count()
    }

    pub fn launched_total(&self) -> u64 {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn terminated_total(&self) -> u64 {
        self.terminated.load(Ordering::SeqCst)
    }

    fn take_launch_failure(&self) -> bool {
        self.failing_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn is_faulty(&self, version: &str) -> bool {
        self.faulty_versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(version)
    }
}

impl Default for InMemoryInstanceDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceDriver for InMemoryInstanceDriver {
    fn name(&self) -> &str {
        "memory"
    }

    async fn launch(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<ServiceInstance, DriverError> {
        if self.take_launch_failure() {
            return Err(DriverError::new("injected launch failure"));
        }

        let version = registration.version().to_string();
        let mut instance = ServiceInstance::new(
            registration.id,
            version.clone(),
            Endpoint::new("memory://pending"),
        );
        instance.endpoint = Endpoint::new(format!(
            "memory://{}/{}",
            registration.id.as_uuid(),
            instance.id.as_uuid()
        ));
        instance
            .metadata
            .insert("driver".to_string(), "memory".to_string());

        let delay = *self
            .startup_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.instances.insert(
            instance.id,
            SimulatedInstance {
                service_id: registration.id,
                version,
                ready_at: Instant::now() + delay,
                health: None,
            },
        );
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(instance)
    }

    async fn check(&self, instance: &ServiceInstance) -> Result<InstanceReport, DriverError> {
        let simulated = self
            .instances
            .get(&instance.id)
            .map(|entry| entry.clone())
            .ok_or_else(|| DriverError::new(format!("unknown instance {}", instance.id)))?;

        let health = match simulated.health {
            Some(health) => health,
            None if self.is_faulty(&simulated.version) => InstanceHealth::Unhealthy,
            None if Instant::now() < simulated.ready_at => InstanceHealth::Unknown,
            None => InstanceHealth::Healthy,
        };
        let resources = self
            .usage
            .get(&simulated.service_id)
            .map(|usage| *usage)
            .unwrap_or_default();

        Ok(InstanceReport { health, resources })
    }

    async fn terminate(&self, instance: &ServiceInstance) -> Result<(), DriverError> {
        if self.instances.remove(&instance.id).is_some() {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENDPOINT DRIVER
// ═══════════════════════════════════════════════════════════════════════════

/// Tracks externally-run replicas at the registration's endpoints
///
/// Launching assigns the next endpoint of the registration in round-robin
/// order; health comes from a registry [`HealthProbe`]. Termination only
/// forgets the replica, the process itself is managed elsewhere.
pub struct EndpointInstanceDriver {
    probe: Arc<dyn HealthProbe>,
    timeout: Duration,
    cursors: DashMap<ServiceId, usize>,
}

impl EndpointInstanceDriver {
    pub fn new(probe: Arc<dyn HealthProbe>, timeout: Duration) -> Self {
        Self {
            probe,
            timeout,
            cursors: DashMap::new(),
        }
    }
}

#[async_trait]
impl InstanceDriver for EndpointInstanceDriver {
    fn name(&self) -> &str {
        "endpoint"
    }

    async fn launch(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<ServiceInstance, DriverError> {
        if registration.endpoints.is_empty() {
            return Err(DriverError::new("registration has no endpoints"));
        }

        let slot = {
            let mut cursor = self.cursors.entry(registration.id).or_insert(0);
            let slot = *cursor % registration.endpoints.len();
            *cursor = cursor.wrapping_add(1);
            slot
        };

        let mut instance = ServiceInstance::new(
            registration.id,
            registration.version(),
            registration.endpoints[slot].clone(),
        );
        instance
            .metadata
            .insert("driver".to_string(), "endpoint".to_string());
        Ok(instance)
    }

    async fn check(&self, instance: &ServiceInstance) -> Result<InstanceReport, DriverError> {
        let outcome = self.probe.probe(&instance.endpoint, self.timeout).await;
        let health = if outcome.reachable {
            InstanceHealth::Healthy
        } else {
            InstanceHealth::Unhealthy
        };
        Ok(InstanceReport {
            health,
            resources: instance.resources,
        })
    }

    async fn terminate(&self, _instance: &ServiceInstance) -> Result<(), DriverError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_registry::StaticProbe;
    use harbor_types::{ServiceConfiguration, ServiceMetadata, ServiceType};

    fn registration(version: &str) -> ServiceRegistration {
        ServiceRegistration::new(
            ServiceType::Tool,
            ServiceMetadata::new("worker", version),
            ServiceConfiguration::default(),
            vec![
                Endpoint::new("http://worker-a.local:80"),
                Endpoint::new("http://worker-b.local:80"),
            ],
        )
    }

    #[tokio::test]
    async fn memory_driver_reports_healthy_after_launch() {
        let driver = InMemoryInstanceDriver::new();
        let registration = registration("1.0.0");
        let instance = driver.launch(&registration).await.unwrap();

        assert_eq!(instance.version, "1.0.0");
        assert_eq!(instance.service_id, registration.id);
        let report = driver.check(&instance).await.unwrap();
        assert_eq!(report.health, InstanceHealth::Healthy);
        assert_eq!(driver.running_count(registration.id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_driver_respects_startup_delay() {
        let driver = InMemoryInstanceDriver::new().with_startup_delay(Duration::from_secs(2));
        let instance = driver.launch(&registration("1.0.0")).await.unwrap();

        assert_eq!(
            driver.check(&instance).await.unwrap().health,
            InstanceHealth::Unknown
        );
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(
            driver.check(&instance).await.unwrap().health,
            InstanceHealth::Healthy
        );
    }

    #[tokio::test]
    async fn memory_driver_injects_failures() {
        let driver = InMemoryInstanceDriver::new();
        driver.fail_next_launches(1);
        assert!(driver.launch(&registration("1.0.0")).await.is_err());
        assert!(driver.launch(&registration("1.0.0")).await.is_ok());

        driver.mark_version_faulty("2.0.0");
        let faulty = driver.launch(&registration("2.0.0")).await.unwrap();
        assert_eq!(
            driver.check(&faulty).await.unwrap().health,
            InstanceHealth::Unhealthy
        );

        driver.terminate(&faulty).await.unwrap();
        assert!(!driver.is_running(faulty.id));
        assert!(driver.check(&faulty).await.is_err());
    }

    #[tokio::test]
    async fn endpoint_driver_cycles_endpoints_and_probes() {
        let probe = Arc::new(StaticProbe::reachable());
        probe.set_reachable("http://worker-b.local:80", false);
        let driver = EndpointInstanceDriver::new(probe, Duration::from_millis(50));
        let registration = registration("1.0.0");

        let first = driver.launch(&registration).await.unwrap();
        let second = driver.launch(&registration).await.unwrap();
        let third = driver.launch(&registration).await.unwrap();
        assert_eq!(first.endpoint.url, "http://worker-a.local:80");
        assert_eq!(second.endpoint.url, "http://worker-b.local:80");
        assert_eq!(third.endpoint.url, "http://worker-a.local:80");

        assert_eq!(
            driver.check(&first).await.unwrap().health,
            InstanceHealth::Healthy
        );
        assert_eq!(
            driver.check(&second).await.unwrap().health,
            InstanceHealth::Unhealthy
        );
    }
}
