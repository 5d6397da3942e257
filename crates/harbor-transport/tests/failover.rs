//! Failover across fault-injecting memory backends.

use harbor_transport::{
    LoadBalancingStrategy, MemoryTransport, Message, Transport, TransportConfig, TransportError,
    TransportLayer, TransportLayerConfig, TransportStatus,
};
use harbor_types::HarborEvent;
use std::sync::Arc;

async fn layer_with(urls: &[&str], failover: bool) -> (TransportLayer, Vec<Arc<MemoryTransport>>) {
    let config = TransportLayerConfig {
        failover,
        ..Default::default()
    };
    let layer = TransportLayer::from_config(config).unwrap();
    let mut backends = Vec::new();
    for url in urls {
        let backend = Arc::new(MemoryTransport::new(*url));
        layer
            .attach(TransportConfig::memory(*url), backend.clone())
            .await
            .unwrap();
        backends.push(backend);
    }
    layer.connect().await.unwrap();
    (layer, backends)
}

#[tokio::test]
async fn send_fails_over_and_moves_active_pointer() {
    let (layer, backends) = layer_with(&["memory://a", "memory://b", "memory://c"], true).await;
    let mut events = layer.subscribe();
    assert_eq!(layer.get_active_transport().await.as_deref(), Some("memory://a"));

    backends[0].set_fail_sends(true);
    let mut rx_b = backends[1].take_receiver().unwrap();

    let message = Message::request("ping", serde_json::json!({}));
    layer.send(&message).await.unwrap();

    assert_eq!(layer.get_active_transport().await.as_deref(), Some("memory://b"));
    assert_eq!(rx_b.recv().await.unwrap().id, message.id);
    assert_eq!(layer.statistics().await.failovers, 1);

    let mut saw_success = false;
    while let Ok(envelope) = events.try_recv() {
        if let HarborEvent::FailoverSucceeded { from, to } = envelope.event {
            assert_eq!(from, "memory://a");
            assert_eq!(to, "memory://b");
            saw_success = true;
        }
    }
    assert!(saw_success);

    // Subsequent sends stay on the new active backend.
    layer.send(&message).await.unwrap();
    assert_eq!(backends[1].statistics().messages_sent, 2);
}

#[tokio::test]
async fn exhausted_failover_returns_original_error() {
    let (layer, backends) = layer_with(&["memory://a", "memory://b"], true).await;
    for backend in &backends {
        backend.set_fail_sends(true);
    }

    let err = layer
        .send(&Message::request("ping", serde_json::Value::Null))
        .await
        .unwrap_err();
    match err {
        TransportError::SendFailed { url, .. } => assert_eq!(url, "memory://a"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(layer.get_active_transport().await.as_deref(), Some("memory://a"));
}

#[tokio::test]
async fn failover_disabled_surfaces_first_error() {
    let (layer, backends) = layer_with(&["memory://a", "memory://b"], false).await;
    backends[0].set_fail_sends(true);

    assert!(layer
        .send(&Message::request("ping", serde_json::Value::Null))
        .await
        .is_err());
    assert_eq!(backends[1].statistics().messages_sent, 0);
}

#[tokio::test]
async fn partial_connect_is_tolerated() {
    let config = TransportLayerConfig::default();
    let layer = TransportLayer::from_config(config).unwrap();
    let broken = Arc::new(MemoryTransport::new("memory://broken"));
    broken.set_fail_connect(true);
    let healthy = Arc::new(MemoryTransport::new("memory://healthy"));
    layer
        .attach(TransportConfig::memory("memory://broken"), broken.clone())
        .await
        .unwrap();
    layer
        .attach(TransportConfig::memory("memory://healthy"), healthy.clone())
        .await
        .unwrap();

    layer.connect().await.unwrap();
    assert_eq!(broken.status(), TransportStatus::Error);
    assert_eq!(
        layer.get_active_transport().await.as_deref(),
        Some("memory://healthy")
    );
}

#[tokio::test]
async fn health_check_reselects_when_active_breaks() {
    let (layer, backends) = layer_with(&["memory://a", "memory://b"], true).await;
    backends[0].set_broken(true);

    layer.run_health_check().await;

    assert_eq!(backends[0].status(), TransportStatus::Error);
    assert_eq!(layer.get_active_transport().await.as_deref(), Some("memory://b"));
}

#[tokio::test]
async fn strategy_change_reselects() {
    let (layer, backends) = layer_with(&["memory://a", "memory://b"], true).await;
    backends[1].set_broken(true);
    layer.run_health_check().await;

    layer
        .set_load_balancing_strategy(LoadBalancingStrategy::LeastConnections)
        .await;
    assert_eq!(layer.strategy(), LoadBalancingStrategy::LeastConnections);
    assert_eq!(layer.get_active_transport().await.as_deref(), Some("memory://a"));
}
