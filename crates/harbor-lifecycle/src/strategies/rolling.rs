//! Rolling update strategy

use super::executor::{UpdateExecutor, UpdateOutcome};
use crate::context::OperationContext;
use crate::error::{LifecycleError, Result};
use async_trait::async_trait;
use harbor_types::{InstanceId, ServiceInstance};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Replaces instances in rounds bounded by surge and unavailability
///
/// Each round launches up to `max_surge` instances above the desired count,
/// waits for them to turn healthy, then retires up to `max_unavailable` old
/// instances (more when the surge left the pool above the desired count).
/// The pool never exceeds `desired + max_surge` and never drops below
/// `desired - max_unavailable`.
pub struct RollingExecutor {
    max_surge: usize,
    max_unavailable: usize,
}

impl RollingExecutor {
    pub fn new(max_surge: usize, max_unavailable: usize) -> Self {
        Self {
            max_surge,
            max_unavailable,
        }
    }
}

#[async_trait]
impl UpdateExecutor for RollingExecutor {
    async fn execute(
        &self,
        current: Vec<ServiceInstance>,
        desired: usize,
        ctx: &OperationContext,
    ) -> Result<UpdateOutcome> {
        info!(
            service_id = %ctx.service_id(),
            current = current.len(),
            desired,
            max_surge = self.max_surge,
            max_unavailable = self.max_unavailable,
            "Starting rolling update"
        );

        let old = current.iter().map(|instance| instance.id).collect();
        rolling_replace(ctx, old, 0, desired, self.max_surge, self.max_unavailable).await
    }

    fn name(&self) -> &'static str {
        "rolling"
    }
}

/// Roll `old` out until `desired` instances of the target registration run
///
/// `new_count` is how many target instances already exist in the pool.
pub(crate) async fn rolling_replace(
    ctx: &OperationContext,
    mut old: VecDeque<InstanceId>,
    mut new_count: usize,
    desired: usize,
    max_surge: usize,
    max_unavailable: usize,
) -> Result<UpdateOutcome> {
    let mut outcome = UpdateOutcome::default();
    let floor = desired.saturating_sub(max_unavailable);

    while !old.is_empty() || new_count < desired {
        ctx.ensure_not_cancelled()?;

        let total = old.len() + new_count;
        let need = desired.saturating_sub(new_count);
        let surge = need.min((desired + max_surge).saturating_sub(total));
        if surge > 0 {
            let created = ctx.create_instances(surge).await?;
            ctx.wait_for_healthy(&created).await?;
            new_count += surge;
            outcome.created += surge;
        }

        let total = old.len() + new_count;
        let retire = old
            .len()
            .min(max_unavailable.max(total.saturating_sub(desired)))
            .min(total.saturating_sub(floor));
        for _ in 0..retire {
            if let Some(id) = old.pop_front() {
                ctx.retire_instance(id).await?;
                outcome.terminated += 1;
            }
        }

        debug!(
            service_id = %ctx.service_id(),
            created = surge,
            retired = retire,
            remaining_old = old.len(),
            "Rolling round complete"
        );

        if surge == 0 && retire == 0 {
            return Err(LifecycleError::Instance {
                service_id: ctx.service_id(),
                phase: ctx.phase(),
                reason: "rolling update cannot make progress with the configured bounds".into(),
            });
        }
    }

    info!(
        service_id = %ctx.service_id(),
        created = outcome.created,
        terminated = outcome.terminated,
        "Rolling update complete"
    );
    Ok(outcome)
}
