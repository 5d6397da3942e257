//! Per-service state owned by the lifecycle manager

use harbor_types::{
    InstanceHealth, InstanceId, LifecycleEvent, Phase, ScalingConfig, ServiceId, ServiceInstance,
    ServiceRegistration, UpdateConfig,
};
use std::collections::VecDeque;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Mutable state of one managed service
#[derive(Debug, Clone)]
pub(crate) struct ServiceState {
    /// Registration the pool currently converges to
    pub registration: ServiceRegistration,
    pub scaling: ScalingConfig,
    pub update: UpdateConfig,
    pub phase: Phase,
    /// Instance pool, oldest first
    pub instances: Vec<ServiceInstance>,
    /// Token of the running (or last) operation
    pub cancel: CancellationToken,
    pub last_scale_up: Option<Instant>,
    pub last_scale_down: Option<Instant>,
}

impl ServiceState {
    pub fn new(
        registration: ServiceRegistration,
        scaling: ScalingConfig,
        update: UpdateConfig,
    ) -> Self {
        Self {
            registration,
            scaling,
            update,
            phase: Phase::Initializing,
            instances: Vec::new(),
            cancel: CancellationToken::new(),
            last_scale_up: None,
            last_scale_down: None,
        }
    }

    pub fn instance(&self, id: InstanceId) -> Option<&ServiceInstance> {
        self.instances.iter().find(|instance| instance.id == id)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut ServiceInstance> {
        self.instances.iter_mut().find(|instance| instance.id == id)
    }

    pub fn remove_instance(&mut self, id: InstanceId) -> Option<ServiceInstance> {
        let position = self.instances.iter().position(|instance| instance.id == id)?;
        Some(self.instances.remove(position))
    }

    pub fn healthy_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|instance| instance.is_healthy())
            .count()
    }

    /// Scale-down victims: healthy first, then unknown, then unhealthy;
    /// newest first within each group
    pub fn scale_down_order(&self) -> Vec<InstanceId> {
        let rank = |health: InstanceHealth| match health {
            InstanceHealth::Healthy => 0,
            InstanceHealth::Unknown => 1,
            InstanceHealth::Unhealthy => 2,
        };
        let mut ordered: Vec<(usize, &ServiceInstance)> =
            self.instances.iter().enumerate().collect();
        ordered.sort_by(|(a_pos, a), (b_pos, b)| {
            rank(a.health)
                .cmp(&rank(b.health))
                .then_with(|| b_pos.cmp(a_pos))
        });
        ordered.into_iter().map(|(_, instance)| instance.id).collect()
    }
}

/// A managed service: the operation lock plus its state
#[derive(Debug)]
pub(crate) struct ServiceEntry {
    pub id: ServiceId,
    /// Held for the full duration of start, stop, scale and update
    pub op_lock: Mutex<()>,
    pub state: RwLock<ServiceState>,
}

impl ServiceEntry {
    pub fn new(state: ServiceState) -> Self {
        Self {
            id: state.registration.id,
            op_lock: Mutex::new(()),
            state: RwLock::new(state),
        }
    }

    pub async fn phase(&self) -> Phase {
        self.state.read().await.phase
    }

    pub async fn snapshot(&self) -> ServiceState {
        self.state.read().await.clone()
    }

    pub async fn instances(&self) -> Vec<ServiceInstance> {
        self.state.read().await.instances.clone()
    }

    /// Replace the cancellation token for a new operation
    pub async fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        self.state.write().await.cancel = token.clone();
        token
    }
}

/// Bounded, append-only record of phase transitions
#[derive(Debug)]
pub(crate) struct EventHistory {
    limit: usize,
    events: VecDeque<LifecycleEvent>,
}

impl EventHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            events: VecDeque::new(),
        }
    }

    pub fn push(&mut self, event: LifecycleEvent) {
        if self.events.len() >= self.limit {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Events newest-last, optionally for one service and only the last `limit`
    pub fn query(&self, service_id: Option<ServiceId>, limit: Option<usize>) -> Vec<LifecycleEvent> {
        let matching: Vec<&LifecycleEvent> = self
            .events
            .iter()
            .filter(|event| service_id.map_or(true, |id| event.service_id == id))
            .collect();
        let skip = limit.map_or(0, |limit| matching.len().saturating_sub(limit));
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn last_for(&self, service_id: ServiceId) -> Option<LifecycleEvent> {
        self.events
            .iter()
            .rev()
            .find(|event| event.service_id == service_id)
            .cloned()
    }
}
