//! Blue-green update strategy

use super::executor::{UpdateExecutor, UpdateOutcome};
use crate::context::OperationContext;
use crate::error::Result;
use async_trait::async_trait;
use harbor_types::{InstanceId, ServiceInstance};
use tracing::{info, warn};

/// Stands up a full parallel (green) set, then retires the old (blue) set
///
/// If the green set fails to launch or turn healthy it is torn down and
/// the blue set keeps serving.
pub struct BlueGreenExecutor;

impl BlueGreenExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BlueGreenExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BlueGreenExecutor {
    async fn stand_up_green(
        &self,
        desired: usize,
        green: &mut Vec<InstanceId>,
        ctx: &OperationContext,
    ) -> Result<()> {
        for _ in 0..desired {
            green.push(ctx.create_instance().await?.id);
        }
        ctx.wait_for_healthy(green).await
    }
}

#[async_trait]
impl UpdateExecutor for BlueGreenExecutor {
    async fn execute(
        &self,
        current: Vec<ServiceInstance>,
        desired: usize,
        ctx: &OperationContext,
    ) -> Result<UpdateOutcome> {
        info!(
            service_id = %ctx.service_id(),
            blue = current.len(),
            desired,
            "Starting blue-green update"
        );

        let mut green = Vec::with_capacity(desired);
        if let Err(e) = self.stand_up_green(desired, &mut green, ctx).await {
            warn!(service_id = %ctx.service_id(), error = %e, "Green set failed, tearing it down");
            if let Err(teardown) = ctx.terminate_all(&green).await {
                warn!(service_id = %ctx.service_id(), error = %teardown, "Green teardown incomplete");
            }
            return Err(e);
        }

        info!(service_id = %ctx.service_id(), green = green.len(), "Green set healthy, switching");

        let blue: Vec<InstanceId> = current.iter().map(|instance| instance.id).collect();
        for id in &blue {
            ctx.retire_instance(*id).await?;
        }

        Ok(UpdateOutcome {
            created: green.len(),
            terminated: blue.len(),
        })
    }

    fn name(&self) -> &'static str {
        "blue_green"
    }
}
