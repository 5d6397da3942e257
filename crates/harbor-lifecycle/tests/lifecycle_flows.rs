//! End-to-end lifecycle behavior against the in-memory driver.

use chrono::Utc;
use harbor_lifecycle::{
    InMemoryInstanceDriver, LifecycleAction, LifecycleConfig, LifecycleError, LifecycleManager,
};
use harbor_registry::{RegistryConfig, ServiceRegistry, StaticProbe};
use harbor_transport::{
    MemoryTransport, Message, TransportConfig, TransportLayer, TransportLayerConfig,
};
use harbor_types::{
    Endpoint, ErrorKind, HarborEvent, HarborEventEnvelope, InstanceHealth, Phase, ResourceUsage,
    ScalingConfig, ServiceConfiguration, ServiceMetadata, ServiceRegistration, ServiceStatus,
    ServiceType, UpdateConfig, UpdateStrategy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

struct Harness {
    manager: Arc<LifecycleManager>,
    registry: Arc<ServiceRegistry>,
    driver: Arc<InMemoryInstanceDriver>,
    loopback: Arc<MemoryTransport>,
    drains: mpsc::UnboundedReceiver<Message>,
}

fn fast_config() -> LifecycleConfig {
    LifecycleConfig {
        start_timeout: Duration::from_millis(300),
        grace_period: Duration::from_millis(10),
        health_poll_interval: Duration::from_millis(5),
        auto_scaling_interval: Duration::from_millis(50),
        auto_healing_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

async fn harness_with(config: LifecycleConfig) -> Harness {
    let registry = Arc::new(ServiceRegistry::new(
        RegistryConfig::default(),
        Arc::new(StaticProbe::reachable()),
    ));

    let transport = Arc::new(TransportLayer::from_config(TransportLayerConfig::default()).unwrap());
    let loopback = Arc::new(MemoryTransport::new("memory://control"));
    let drains = loopback.take_receiver().unwrap();
    transport
        .attach(TransportConfig::memory("memory://control"), loopback.clone())
        .await
        .unwrap();
    transport.connect().await.unwrap();

    let driver = Arc::new(InMemoryInstanceDriver::new());
    let manager = Arc::new(LifecycleManager::new(
        config,
        Arc::clone(&registry),
        transport,
        driver.clone(),
    ));

    Harness {
        manager,
        registry,
        driver,
        loopback,
        drains,
    }
}

async fn harness() -> Harness {
    harness_with(fast_config()).await
}

async fn catalog(registry: &ServiceRegistry, name: &str) -> ServiceRegistration {
    let id = registry
        .register_service(
            ServiceType::Tool,
            ServiceMetadata::new(name, "1.0.0"),
            ServiceConfiguration::default(),
            vec![Endpoint::new(format!("http://{name}.local:8080"))],
        )
        .await
        .unwrap();
    registry.get_service(id).unwrap()
}

fn with_version(registration: &ServiceRegistration, version: &str) -> ServiceRegistration {
    let mut next = registration.clone();
    next.metadata.version = version.to_string();
    next
}

fn drain_events(rx: &mut broadcast::Receiver<HarborEventEnvelope>) -> Vec<HarborEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.event);
    }
    events
}

/// Pool sizes reported by every instance creation and termination
fn pool_sizes(events: &[HarborEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|event| match event {
            HarborEvent::InstanceCreated { instance_count, .. }
            | HarborEvent::InstanceTerminated { instance_count, .. } => Some(*instance_count),
            _ => None,
        })
        .collect()
}

async fn wait_for_event<F>(rx: &mut broadcast::Receiver<HarborEventEnvelope>, mut matches: F) -> HarborEvent
where
    F: FnMut(&HarborEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = rx.recv().await.unwrap();
            if matches(&envelope.event) {
                return envelope.event;
            }
        }
    })
    .await
    .expect("event not observed")
}

// ═══════════════════════════════════════════════════════════════════════════
// START, SCALE AND BOUNDS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn start_provisions_min_instances() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;

    h.manager
        .register_service(registration, Some(ScalingConfig::new(2, 5)), None)
        .await
        .unwrap();

    let instances = h.manager.get_service_instances(id).await.unwrap();
    assert_eq!(instances.len(), 2);
    assert!(instances.iter().all(|i| i.health == InstanceHealth::Healthy));
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Running);
    assert_eq!(h.registry.get_service(id).unwrap().status, ServiceStatus::Active);
    assert_eq!(h.driver.running_count(id), 2);
}

#[tokio::test]
async fn scale_passes_through_scaling() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration, Some(ScalingConfig::new(2, 5)), None)
        .await
        .unwrap();

    h.manager.scale_service(id, 4).await.unwrap();

    assert_eq!(h.manager.get_service_instances(id).await.unwrap().len(), 4);
    let events = h.manager.get_lifecycle_events(Some(id), Some(2));
    assert_eq!(events[0].previous_phase, Some(Phase::Running));
    assert_eq!(events[0].phase, Phase::Scaling);
    assert_eq!(events[1].previous_phase, Some(Phase::Scaling));
    assert_eq!(events[1].phase, Phase::Running);

    h.manager.scale_service(id, 2).await.unwrap();
    assert_eq!(h.manager.get_service_instances(id).await.unwrap().len(), 2);
    assert_eq!(h.driver.running_count(id), 2);
}

#[tokio::test]
async fn rolling_update_stays_within_bounds() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration.clone(), Some(ScalingConfig::new(2, 5)), None)
        .await
        .unwrap();
    h.manager.scale_service(id, 4).await.unwrap();

    let mut events = h.manager.subscribe();
    h.manager
        .update_service(id, with_version(&registration, "2.0.0"), Some(UpdateStrategy::Rolling))
        .await
        .unwrap();

    let instances = h.manager.get_service_instances(id).await.unwrap();
    assert_eq!(instances.len(), 4);
    assert!(instances.iter().all(|i| i.version == "2.0.0"));

    let sizes = pool_sizes(&drain_events(&mut events));
    assert!(!sizes.is_empty());
    assert!(sizes.iter().all(|n| *n <= 5), "exceeded max: {sizes:?}");
    assert!(sizes.iter().all(|n| *n >= 3), "dropped below floor: {sizes:?}");

    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Running);
    assert_eq!(h.registry.get_service(id).unwrap().metadata.version, "2.0.0");
}

#[tokio::test]
async fn auto_healing_replaces_unhealthy_instance() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(
            registration,
            Some(ScalingConfig::new(2, 5).with_auto_healing(true)),
            None,
        )
        .await
        .unwrap();

    let before = h.manager.get_service_instances(id).await.unwrap();
    let sick = before[0].id;
    assert!(h.driver.set_health(sick, InstanceHealth::Unhealthy));

    let mut events = h.manager.subscribe();
    assert_eq!(h.manager.run_auto_healing().await, 1);

    let after = h.manager.get_service_instances(id).await.unwrap();
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|i| i.id != sick));
    let fresh: Vec<_> = after.iter().filter(|i| i.id != before[1].id).collect();
    assert_eq!(fresh.len(), 1);
    assert!(fresh[0].is_healthy());

    let replaced = drain_events(&mut events).into_iter().find_map(|event| match event {
        HarborEvent::InstanceReplaced {
            old_instance_id,
            new_instance_id,
            ..
        } => Some((old_instance_id, new_instance_id)),
        _ => None,
    });
    assert_eq!(replaced, Some((sick, fresh[0].id)));
    assert!(!h.driver.is_running(sick));
}

#[tokio::test]
async fn scale_beyond_bounds_is_rejected() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration, Some(ScalingConfig::new(2, 5)), None)
        .await
        .unwrap();
    let events_before = h.manager.get_lifecycle_events(Some(id), None).len();

    let err = h.manager.scale_service(id, 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("bounds"));
    assert_eq!(err.service_id(), Some(id));
    assert_eq!(err.phase(), Some(Phase::Running));

    assert_eq!(h.manager.get_service_instances(id).await.unwrap().len(), 2);
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Running);
    assert_eq!(
        h.manager.get_lifecycle_events(Some(id), None).len(),
        events_before
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// START / STOP
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn graceful_stop_drains_and_is_idempotent() {
    let mut h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration, Some(ScalingConfig::new(2, 5)), None)
        .await
        .unwrap();
    let instances = h.manager.get_service_instances(id).await.unwrap();

    h.manager.stop_service(id, true).await.unwrap();
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Inactive);
    assert!(h.manager.get_service_instances(id).await.unwrap().is_empty());
    assert_eq!(h.driver.running_count(id), 0);

    for instance in &instances {
        let drain = h.drains.try_recv().unwrap();
        assert_eq!(drain.method, "drain");
        assert_eq!(drain.target.as_ref(), Some(&instance.endpoint));
    }

    let events_after_first = h.manager.get_lifecycle_events(Some(id), None).len();
    h.manager.stop_service(id, true).await.unwrap();
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Inactive);
    assert_eq!(
        h.manager.get_lifecycle_events(Some(id), None).len(),
        events_after_first
    );

    h.manager.start_service(id).await.unwrap();
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Running);
    assert_eq!(h.manager.get_service_instances(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn undeliverable_drain_moves_service_to_error() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration, None, None)
        .await
        .unwrap();
    h.loopback.set_fail_sends(true);

    let err = h.manager.stop_service(id, true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.phase(), Some(Phase::Stopping));
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Error);
    assert_eq!(h.registry.get_service(id).unwrap().status, ServiceStatus::Error);

    let last = h.manager.get_lifecycle_events(Some(id), Some(1));
    assert!(last[0].error.is_some());

    // Error -> Stopping is allowed, so an immediate stop still succeeds.
    h.manager.stop_service(id, false).await.unwrap();
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Inactive);
}

#[tokio::test]
async fn start_timeout_surfaces_error_and_retry_recovers() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.driver.mark_version_faulty("1.0.0");

    let err = h
        .manager
        .register_service(registration, Some(ScalingConfig::new(2, 5)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Timeout { .. }));
    assert_eq!(err.phase(), Some(Phase::Starting));
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Error);
    assert_eq!(h.registry.get_service(id).unwrap().status, ServiceStatus::Error);

    h.driver.clear_faulty_versions();
    h.manager.start_service(id).await.unwrap();
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Running);
    assert_eq!(h.registry.get_service(id).unwrap().status, ServiceStatus::Active);
    assert_eq!(h.manager.get_service_instances(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn cancelled_start_launches_nothing_further() {
    let config = LifecycleConfig {
        start_timeout: Duration::from_secs(30),
        ..fast_config()
    };
    let h = harness_with(config).await;
    h.driver.set_startup_delay(Duration::from_secs(60));
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;

    let manager = Arc::clone(&h.manager);
    let start = tokio::spawn(async move {
        manager
            .register_service(registration, Some(ScalingConfig::new(2, 5)), None)
            .await
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.driver.launched_total() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(h.manager.cancel_operation(id).await.unwrap());
    let err = start.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Error);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.driver.launched_total(), 2);
}

#[tokio::test]
async fn concurrent_operation_is_a_state_conflict() {
    let config = LifecycleConfig {
        start_timeout: Duration::from_secs(5),
        ..fast_config()
    };
    let h = harness_with(config).await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration.clone(), Some(ScalingConfig::new(1, 5)), None)
        .await
        .unwrap();

    h.driver.set_startup_delay(Duration::from_millis(500));
    let manager = Arc::clone(&h.manager);
    let next = with_version(&registration, "2.0.0");
    let update = tokio::spawn(async move { manager.update_service(id, next, None).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.manager.get_phase(id).await.unwrap() != Phase::Updating {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = h.manager.scale_service(id, 3).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    assert_eq!(err.phase(), Some(Phase::Updating));

    update.await.unwrap().unwrap();
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Running);
}

// ═══════════════════════════════════════════════════════════════════════════
// UPDATE STRATEGIES
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn blue_green_swaps_the_whole_set() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration.clone(), Some(ScalingConfig::new(2, 5)), None)
        .await
        .unwrap();
    let blue: Vec<_> = h
        .manager
        .get_service_instances(id)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();

    let mut events = h.manager.subscribe();
    h.manager
        .update_service(id, with_version(&registration, "2.0.0"), Some(UpdateStrategy::BlueGreen))
        .await
        .unwrap();

    let green = h.manager.get_service_instances(id).await.unwrap();
    assert_eq!(green.len(), 2);
    assert!(green.iter().all(|i| i.version == "2.0.0" && !blue.contains(&i.id)));
    assert_eq!(pool_sizes(&drain_events(&mut events)).into_iter().max(), Some(4));
}

#[tokio::test]
async fn blue_green_failure_keeps_blue_serving() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    let update = UpdateConfig {
        rollback_on_failure: false,
        ..UpdateConfig::default().with_strategy(UpdateStrategy::BlueGreen)
    };
    h.manager
        .register_service(registration.clone(), Some(ScalingConfig::new(2, 5)), Some(update))
        .await
        .unwrap();
    let blue: Vec<_> = h
        .manager
        .get_service_instances(id)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    h.driver.mark_version_faulty("2.0.0");

    let err = h
        .manager
        .update_service(id, with_version(&registration, "2.0.0"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Error);

    let remaining: Vec<_> = h
        .manager
        .get_service_instances(id)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(remaining, blue);
    assert_eq!(h.driver.running_count(id), 2);
}

#[tokio::test]
async fn canary_promotes_after_stabilization() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    let update = UpdateConfig {
        stabilization_window: Duration::from_millis(20),
        ..UpdateConfig::default().with_strategy(UpdateStrategy::Canary)
    };
    h.manager
        .register_service(registration.clone(), Some(ScalingConfig::new(5, 6)), Some(update))
        .await
        .unwrap();

    let mut events = h.manager.subscribe();
    h.manager
        .update_service(id, with_version(&registration, "2.0.0"), None)
        .await
        .unwrap();

    let instances = h.manager.get_service_instances(id).await.unwrap();
    assert_eq!(instances.len(), 5);
    assert!(instances.iter().all(|i| i.version == "2.0.0"));

    // A single canary (20% of 5) joins the pool before anything is retired.
    let sizes = pool_sizes(&drain_events(&mut events));
    assert_eq!(sizes.first(), Some(&6));
    assert_eq!(sizes.get(1), Some(&5));
}

#[tokio::test]
async fn recreate_replaces_everything() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration.clone(), Some(ScalingConfig::new(3, 5)), None)
        .await
        .unwrap();

    let mut events = h.manager.subscribe();
    h.manager
        .update_service(id, with_version(&registration, "2.0.0"), Some(UpdateStrategy::Recreate))
        .await
        .unwrap();

    let instances = h.manager.get_service_instances(id).await.unwrap();
    assert_eq!(instances.len(), 3);
    assert!(instances.iter().all(|i| i.version == "2.0.0"));
    assert_eq!(pool_sizes(&drain_events(&mut events)), vec![2, 1, 0, 1, 2, 3]);

    let updated = h.manager.get_service_status(id).await.unwrap();
    assert_eq!(updated.version, "2.0.0");
}

#[tokio::test]
async fn failed_update_rolls_back_to_previous_registration() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration.clone(), Some(ScalingConfig::new(2, 5)), None)
        .await
        .unwrap();
    h.driver.mark_version_faulty("2.0.0");

    let mut events = h.manager.subscribe();
    let err = h
        .manager
        .update_service(id, with_version(&registration, "2.0.0"), Some(UpdateStrategy::Rolling))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.phase(), Some(Phase::Updating));

    let events = drain_events(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, HarborEvent::UpdateFailed { .. })));
    assert!(events.iter().any(
        |e| matches!(e, HarborEvent::RollbackStarted { to_version, .. } if to_version == "1.0.0")
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, HarborEvent::RollbackCompleted { success: true, .. })));

    let instances = h.manager.get_service_instances(id).await.unwrap();
    assert_eq!(instances.len(), 2);
    assert!(instances.iter().all(|i| i.version == "1.0.0" && i.is_healthy()));
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Running);
    assert_eq!(h.registry.get_service(id).unwrap().status, ServiceStatus::Active);
    assert_eq!(h.registry.get_service(id).unwrap().metadata.version, "1.0.0");
}

// ═══════════════════════════════════════════════════════════════════════════
// AUTOMATION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn auto_scaling_follows_utilization() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    let scaling = ScalingConfig::new(1, 3)
        .with_auto_scaling(true)
        .with_cooldowns(Duration::ZERO, Duration::ZERO);
    h.manager
        .register_service(registration, Some(scaling), None)
        .await
        .unwrap();

    let mut events = h.manager.subscribe();
    h.driver.set_usage(id, ResourceUsage::new(95.0, 40.0, 0.0));
    assert_eq!(h.manager.run_auto_scaling().await, 1);
    assert_eq!(h.manager.get_service_instances(id).await.unwrap().len(), 2);
    assert!(drain_events(&mut events).iter().any(|e| matches!(
        e,
        HarborEvent::AutoScaled { from: 1, to: 2, .. }
    )));

    h.driver.set_usage(id, ResourceUsage::new(50.0, 50.0, 0.0));
    assert_eq!(h.manager.run_auto_scaling().await, 0);

    h.driver.set_usage(id, ResourceUsage::new(5.0, 5.0, 0.0));
    assert_eq!(h.manager.run_auto_scaling().await, 1);
    assert_eq!(h.manager.get_service_instances(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn background_loops_heal_without_explicit_ticks() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(
            registration,
            Some(ScalingConfig::new(1, 2).with_auto_healing(true)),
            None,
        )
        .await
        .unwrap();
    let sick = h.manager.get_service_instances(id).await.unwrap()[0].id;

    let mut events = h.manager.subscribe();
    h.manager.start();
    h.driver.set_health(sick, InstanceHealth::Unhealthy);

    let replaced = wait_for_event(&mut events, |e| {
        matches!(e, HarborEvent::InstanceReplaced { .. })
    })
    .await;
    assert!(matches!(
        replaced,
        HarborEvent::InstanceReplaced { old_instance_id, .. } if old_instance_id == sick
    ));
    h.manager.shutdown().await;
}

// ═══════════════════════════════════════════════════════════════════════════
// SCHEDULED ACTIONS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn due_action_runs_and_reports() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration, Some(ScalingConfig::new(1, 5)), None)
        .await
        .unwrap();

    let mut events = h.manager.subscribe();
    let action_id = h
        .manager
        .schedule_action(id, LifecycleAction::Scale { target: 3 }, Utc::now())
        .unwrap();

    let executed = wait_for_event(&mut events, |e| {
        matches!(e, HarborEvent::ActionExecuted { .. } | HarborEvent::ActionFailed { .. })
    })
    .await;
    assert!(matches!(
        executed,
        HarborEvent::ActionExecuted { action_id: done, .. } if done == action_id
    ));
    assert_eq!(h.manager.get_service_instances(id).await.unwrap().len(), 3);
    assert!(h.manager.pending_actions().is_empty());
}

#[tokio::test]
async fn failing_action_reports_reason() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration, Some(ScalingConfig::new(1, 2)), None)
        .await
        .unwrap();

    let mut events = h.manager.subscribe();
    h.manager
        .schedule_action(id, LifecycleAction::Scale { target: 9 }, Utc::now())
        .unwrap();

    let failed = wait_for_event(&mut events, |e| {
        matches!(e, HarborEvent::ActionExecuted { .. } | HarborEvent::ActionFailed { .. })
    })
    .await;
    assert!(matches!(failed, HarborEvent::ActionFailed { reason, .. } if reason.contains("bounds")));
}

#[tokio::test]
async fn future_action_can_be_cancelled() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;
    let id = registration.id;
    h.manager
        .register_service(registration, None, None)
        .await
        .unwrap();

    let at = Utc::now() + chrono::Duration::hours(1);
    let action_id = h
        .manager
        .schedule_action(id, LifecycleAction::Stop { graceful: true }, at)
        .unwrap();

    let pending = h.manager.pending_actions();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, action_id);
    assert_eq!(pending[0].at, at);

    h.manager.cancel_action(action_id).unwrap();
    assert!(h.manager.pending_actions().is_empty());
    let err = h.manager.cancel_action(action_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.manager.get_phase(id).await.unwrap(), Phase::Running);
}

#[tokio::test]
async fn actions_require_a_managed_service() {
    let h = harness().await;
    let registration = catalog(&h.registry, "orders").await;

    let err = h
        .manager
        .schedule_action(registration.id, LifecycleAction::Start, Utc::now())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
