//! Canary update strategy

use super::executor::{UpdateExecutor, UpdateOutcome};
use super::rolling::rolling_replace;
use crate::context::OperationContext;
use crate::error::{LifecycleError, Result};
use async_trait::async_trait;
use harbor_types::{InstanceId, ServiceInstance};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{info, warn};

/// Launches a small canary set, watches it for a stabilization window,
/// then rolls out the remainder
pub struct CanaryExecutor {
    percent: u32,
    stabilization_window: Duration,
    max_surge: usize,
    max_unavailable: usize,
}

impl CanaryExecutor {
    pub fn new(
        percent: u32,
        stabilization_window: Duration,
        max_surge: usize,
        max_unavailable: usize,
    ) -> Self {
        Self {
            percent,
            stabilization_window,
            max_surge,
            max_unavailable,
        }
    }

    /// Canary instances for a pool of `desired`: rounded up, at least one
    pub fn canary_count(&self, desired: usize) -> usize {
        if desired == 0 {
            return 0;
        }
        let percent = self.percent.clamp(1, 100) as usize;
        ((desired * percent).div_ceil(100)).clamp(1, desired)
    }
}

#[async_trait]
impl UpdateExecutor for CanaryExecutor {
    async fn execute(
        &self,
        current: Vec<ServiceInstance>,
        desired: usize,
        ctx: &OperationContext,
    ) -> Result<UpdateOutcome> {
        let canary_count = self.canary_count(desired);
        info!(
            service_id = %ctx.service_id(),
            current = current.len(),
            desired,
            canary_count,
            "Starting canary update"
        );

        let canaries = ctx.create_instances(canary_count).await?;
        ctx.wait_for_healthy(&canaries).await?;

        ctx.pause(self.stabilization_window).await?;
        let healthy = ctx.refresh(&canaries).await;
        if healthy < canaries.len() {
            warn!(
                service_id = %ctx.service_id(),
                healthy,
                canaries = canaries.len(),
                "Canary unhealthy after stabilization"
            );
            return Err(LifecycleError::Instance {
                service_id: ctx.service_id(),
                phase: ctx.phase(),
                reason: format!(
                    "{} of {} canary instance(s) unhealthy after stabilization",
                    canaries.len() - healthy,
                    canaries.len()
                ),
            });
        }

        info!(service_id = %ctx.service_id(), "Canary stable, promoting");

        let mut old: VecDeque<InstanceId> = current.iter().map(|instance| instance.id).collect();
        let mut terminated = 0;
        for _ in 0..canary_count.min(old.len()) {
            if let Some(id) = old.pop_front() {
                ctx.retire_instance(id).await?;
                terminated += 1;
            }
        }

        let rest = rolling_replace(
            ctx,
            old,
            canary_count,
            desired,
            self.max_surge,
            self.max_unavailable,
        )
        .await?;

        Ok(UpdateOutcome {
            created: canary_count + rest.created,
            terminated: terminated + rest.terminated,
        })
    }

    fn name(&self) -> &'static str {
        "canary"
    }
}
