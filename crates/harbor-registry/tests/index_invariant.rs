//! The status and type indexes stay consistent under arbitrary operation sequences.

use harbor_registry::{RegistryConfig, ServiceRegistry, StaticProbe};
use harbor_types::{
    Endpoint, MetadataUpdate, ServiceConfiguration, ServiceId, ServiceMetadata, ServiceType,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    Register(usize),
    Unregister(usize),
    Deprecate(usize),
    Reactivate(usize),
    MarkError(usize),
    MarkActive(usize),
    UpdateVersion(usize, u8),
    Cleanup,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..ServiceType::ALL.len()).prop_map(Op::Register),
        1 => any::<usize>().prop_map(Op::Unregister),
        1 => any::<usize>().prop_map(Op::Deprecate),
        1 => any::<usize>().prop_map(Op::Reactivate),
        1 => any::<usize>().prop_map(Op::MarkError),
        1 => any::<usize>().prop_map(Op::MarkActive),
        1 => (any::<usize>(), any::<u8>()).prop_map(|(k, v)| Op::UpdateVersion(k, v)),
        1 => Just(Op::Cleanup),
    ]
}

fn pick(ids: &[ServiceId], k: usize) -> Option<ServiceId> {
    (!ids.is_empty()).then(|| ids[k % ids.len()])
}

async fn apply(registry: &ServiceRegistry, ids: &mut Vec<ServiceId>, op: Op) {
    // Individual operations may legitimately fail (illegal transition,
    // evicted id); only the index invariant matters here.
    match op {
        Op::Register(t) => {
            let n = ids.len();
            if let Ok(id) = registry
                .register_service(
                    ServiceType::ALL[t],
                    ServiceMetadata::new(format!("svc-{n}"), "1.0.0"),
                    ServiceConfiguration::default(),
                    vec![Endpoint::new(format!("http://svc-{n}.local:80"))],
                )
                .await
            {
                ids.push(id);
            }
        }
        Op::Unregister(k) => {
            if let Some(id) = pick(ids, k) {
                let _ = registry.unregister_service(id).await;
            }
        }
        Op::Deprecate(k) => {
            if let Some(id) = pick(ids, k) {
                let _ = registry.deprecate_service(id).await;
            }
        }
        Op::Reactivate(k) => {
            if let Some(id) = pick(ids, k) {
                let _ = registry.reactivate_service(id).await;
            }
        }
        Op::MarkError(k) => {
            if let Some(id) = pick(ids, k) {
                let _ = registry.mark_error(id, "injected").await;
            }
        }
        Op::MarkActive(k) => {
            if let Some(id) = pick(ids, k) {
                let _ = registry.mark_active(id).await;
            }
        }
        Op::UpdateVersion(k, v) => {
            if let Some(id) = pick(ids, k) {
                let update = MetadataUpdate {
                    version: Some(format!("1.{v}.0")),
                    ..Default::default()
                };
                let _ = registry.update_metadata(id, update).await;
            }
        }
        Op::Cleanup => {
            registry.run_cleanup().await;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn index_matches_records(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let violations = runtime.block_on(async {
            let config = RegistryConfig {
                inactive_retention: Duration::ZERO,
                ..Default::default()
            };
            let registry = ServiceRegistry::new(config, Arc::new(StaticProbe::reachable()));
            let mut ids = Vec::new();
            for op in ops {
                apply(&registry, &mut ids, op).await;
            }
            registry.validate().await
        });

        prop_assert!(violations.is_empty(), "violations: {:?}", violations);
    }
}

#[tokio::test]
async fn round_trip_preserves_metadata_and_configuration() {
    let registry = ServiceRegistry::new(
        RegistryConfig::default(),
        Arc::new(StaticProbe::reachable()),
    );
    let metadata = ServiceMetadata::new("catalog", "2.1.0")
        .with_description("product catalog")
        .with_tags(["shop", "read"])
        .with_capabilities(["query"])
        .with_category("commerce")
        .with_author("platform");
    let configuration = ServiceConfiguration {
        max_connections: 32,
        timeout: Duration::from_millis(750),
        ..Default::default()
    };

    let id = registry
        .register_service(
            ServiceType::Resource,
            metadata.clone(),
            configuration.clone(),
            vec![Endpoint::new("http://catalog.local:9000")],
        )
        .await
        .unwrap();

    let stored = registry.get_service(id).unwrap();
    assert_eq!(stored.metadata, metadata);
    assert_eq!(stored.configuration, configuration);
    assert_eq!(stored.statistics.total_requests, 0);
}
