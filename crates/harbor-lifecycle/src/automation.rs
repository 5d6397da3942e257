//! Auto-scaling and auto-healing
//!
//! Both loops visit every service with the policy enabled and skip any
//! service whose operation lock is held; the next tick re-evaluates it.

use crate::context::OperationContext;
use crate::error::Result;
use crate::manager::LifecycleManager;
use crate::state::ServiceEntry;
use harbor_types::{
    EventSource, HarborEvent, InstanceHealth, InstanceId, Phase, ResourceUsage, ScalingConfig,
};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Target count for the observed utilization, if a scale is due
///
/// Scales up when either mean exceeds its target, down when both are under
/// half of theirs. Cooldowns are measured from the last scale in the same
/// direction.
pub(crate) fn scaling_target(
    scaling: &ScalingConfig,
    current: usize,
    cpu_percent: f64,
    memory_percent: f64,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
    now: Instant,
) -> Option<usize> {
    let min = scaling.min_instances as usize;
    let max = scaling.max_instances as usize;
    let cooled = |last: Option<Instant>, cooldown: Duration| {
        last.map_or(true, |at| now.saturating_duration_since(at) >= cooldown)
    };

    let overloaded = cpu_percent > scaling.target_cpu_percent
        || memory_percent > scaling.target_memory_percent;
    let idle = cpu_percent < scaling.target_cpu_percent / 2.0
        && memory_percent < scaling.target_memory_percent / 2.0;

    if overloaded && current < max && cooled(last_scale_up, scaling.scale_up_cooldown) {
        return Some((current + scaling.scale_up_increment as usize).min(max));
    }
    if idle && current > min && cooled(last_scale_down, scaling.scale_down_cooldown) {
        return Some(current.saturating_sub(scaling.scale_down_increment as usize).max(min));
    }
    None
}

impl LifecycleManager {
    // ═══════════════════════════════════════════════════════════════════
    // AUTO-SCALING
    // ═══════════════════════════════════════════════════════════════════

    /// One auto-scaling pass; returns how many services were scaled
    pub async fn run_auto_scaling(&self) -> usize {
        let mut scaled = 0;
        for entry in self.entries() {
            match self.auto_scale(&entry).await {
                Ok(true) => scaled += 1,
                Ok(false) => {}
                Err(e) => warn!(service_id = %entry.id, error = %e, "Auto-scaling failed"),
            }
        }
        scaled
    }

    async fn auto_scale(&self, entry: &Arc<ServiceEntry>) -> Result<bool> {
        let Ok(_guard) = entry.op_lock.try_lock() else {
            debug!(service_id = %entry.id, "Busy, skipping auto-scaling");
            return Ok(false);
        };
        let snapshot = entry.snapshot().await;
        if snapshot.phase != Phase::Running || !snapshot.scaling.auto_scaling {
            return Ok(false);
        }

        let ctx = self.context(
            entry,
            snapshot.registration.clone(),
            Phase::Running,
            snapshot.cancel.clone(),
        );
        let ids: Vec<InstanceId> = snapshot.instances.iter().map(|i| i.id).collect();
        ctx.refresh(&ids).await;

        let snapshot = entry.snapshot().await;
        let Some((cpu, memory)) =
            ResourceUsage::mean(snapshot.instances.iter().map(|i| &i.resources))
        else {
            return Ok(false);
        };

        let current = snapshot.instances.len();
        let Some(target) = scaling_target(
            &snapshot.scaling,
            current,
            cpu,
            memory,
            snapshot.last_scale_up,
            snapshot.last_scale_down,
            Instant::now(),
        ) else {
            return Ok(false);
        };

        info!(
            service_id = %entry.id,
            cpu_percent = cpu,
            memory_percent = memory,
            from = current,
            to = target,
            "Auto-scaling"
        );
        self.scale_locked(entry, snapshot, target).await?;
        self.emit(
            EventSource::Lifecycle,
            HarborEvent::AutoScaled {
                service_id: entry.id,
                from: current,
                to: target,
                cpu_percent: cpu,
                memory_percent: memory,
            },
        );
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════
    // AUTO-HEALING
    // ═══════════════════════════════════════════════════════════════════

    /// One auto-healing pass; returns how many instances were replaced
    pub async fn run_auto_healing(&self) -> usize {
        let mut replaced = 0;
        for entry in self.entries() {
            replaced += self.auto_heal(&entry).await;
        }
        replaced
    }

    async fn auto_heal(&self, entry: &Arc<ServiceEntry>) -> usize {
        let Ok(_guard) = entry.op_lock.try_lock() else {
            debug!(service_id = %entry.id, "Busy, skipping auto-healing");
            return 0;
        };
        let snapshot = entry.snapshot().await;
        if snapshot.phase != Phase::Running || !snapshot.scaling.auto_healing {
            return 0;
        }

        let cancel = entry.fresh_token().await;
        let ctx = self.context(entry, snapshot.registration.clone(), Phase::Running, cancel);
        let ids: Vec<InstanceId> = snapshot.instances.iter().map(|i| i.id).collect();
        ctx.refresh(&ids).await;

        let unhealthy: Vec<InstanceId> = ctx
            .instances()
            .await
            .iter()
            .filter(|instance| instance.health == InstanceHealth::Unhealthy)
            .map(|instance| instance.id)
            .collect();

        let mut replaced = 0;
        for old in unhealthy {
            match self.replace_instance(&ctx, old).await {
                Ok(new) => {
                    replaced += 1;
                    info!(
                        service_id = %entry.id,
                        old_instance_id = %old,
                        new_instance_id = %new,
                        "Instance replaced"
                    );
                    self.emit(
                        EventSource::Lifecycle,
                        HarborEvent::InstanceReplaced {
                            service_id: entry.id,
                            old_instance_id: old,
                            new_instance_id: new,
                        },
                    );
                }
                Err(e) => {
                    warn!(service_id = %entry.id, instance_id = %old, error = %e, "Replacement failed");
                    self.emit(
                        EventSource::Lifecycle,
                        HarborEvent::InstanceReplacementFailed {
                            service_id: entry.id,
                            instance_id: old,
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
        replaced
    }

    /// Launch a replacement, wait for it, then terminate the unhealthy one
    async fn replace_instance(
        &self,
        ctx: &OperationContext,
        old: InstanceId,
    ) -> Result<InstanceId> {
        let replacement = ctx.create_instance().await?;
        if let Err(e) = ctx.wait_for_healthy(&[replacement.id]).await {
            if let Err(cleanup) = ctx.terminate_instance(replacement.id).await {
                debug!(instance_id = %replacement.id, error = %cleanup, "Replacement not cleaned up");
            }
            return Err(e);
        }
        ctx.terminate_instance(old).await?;
        Ok(replacement.id)
    }

    // ═══════════════════════════════════════════════════════════════════
    // BACKGROUND TASKS
    // ═══════════════════════════════════════════════════════════════════

    /// Start the auto-scaling and auto-healing loops
    pub fn start(self: &Arc<Self>) {
        let scaling = {
            let manager = Arc::clone(self);
            let cancel = self.cancel.clone();
            let period = self.config().auto_scaling_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            let scaled = manager.run_auto_scaling().await;
                            debug!(scaled, "Auto-scaling tick");
                        }
                    }
                }
            })
        };

        let healing = {
            let manager = Arc::clone(self);
            let cancel = self.cancel.clone();
            let period = self.config().auto_healing_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            let replaced = manager.run_auto_healing().await;
                            debug!(replaced, "Auto-healing tick");
                        }
                    }
                }
            })
        };

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(scaling);
        tasks.push(healing);
        info!("Lifecycle loops started");
    }

    /// Stop the loops and drop every pending scheduled action
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.actions.clear();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            let _ = task.await;
        }
        info!("Lifecycle manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ScalingConfig {
        ScalingConfig::new(1, 4).with_cooldowns(Duration::from_secs(60), Duration::from_secs(60))
    }

    #[test]
    fn scales_up_when_either_resource_is_hot() {
        let now = Instant::now();
        assert_eq!(scaling_target(&policy(), 2, 90.0, 10.0, None, None, now), Some(3));
        assert_eq!(scaling_target(&policy(), 2, 10.0, 95.0, None, None, now), Some(3));
        assert_eq!(scaling_target(&policy(), 4, 90.0, 90.0, None, None, now), None);
    }

    #[test]
    fn scales_down_only_when_both_are_idle() {
        let now = Instant::now();
        assert_eq!(scaling_target(&policy(), 3, 10.0, 10.0, None, None, now), Some(2));
        assert_eq!(scaling_target(&policy(), 3, 10.0, 50.0, None, None, now), None);
        assert_eq!(scaling_target(&policy(), 1, 0.0, 0.0, None, None, now), None);
    }

    #[test]
    fn cooldowns_are_per_direction() {
        let now = Instant::now();
        let recent = Some(now);
        assert_eq!(scaling_target(&policy(), 2, 90.0, 90.0, recent, None, now), None);
        assert_eq!(scaling_target(&policy(), 2, 5.0, 5.0, recent, None, now), Some(1));
        assert_eq!(
            scaling_target(&policy(), 2, 90.0, 90.0, recent, None, now + Duration::from_secs(61)),
            Some(3)
        );
    }

    #[test]
    fn increments_clamp_to_bounds() {
        let mut scaling = policy();
        scaling.scale_up_increment = 5;
        scaling.scale_down_increment = 5;
        let now = Instant::now();
        assert_eq!(scaling_target(&scaling, 2, 90.0, 0.0, None, None, now), Some(4));
        assert_eq!(scaling_target(&scaling, 3, 0.0, 0.0, None, None, now), Some(1));
    }
}
