//! Recreate update strategy

use super::executor::{UpdateExecutor, UpdateOutcome};
use crate::context::OperationContext;
use crate::error::Result;
use async_trait::async_trait;
use harbor_types::{InstanceId, ServiceInstance};
use tracing::info;

/// Terminates every instance, then provisions the new set from scratch
///
/// The service is unavailable between the two phases.
pub struct RecreateExecutor;

impl RecreateExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RecreateExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpdateExecutor for RecreateExecutor {
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
            "Starting recreate update"
        );

        let old: Vec<InstanceId> = current.iter().map(|instance| instance.id).collect();
        for id in &old {
            ctx.retire_instance(*id).await?;
        }

        let created = ctx.create_instances(desired).await?;
        ctx.wait_for_healthy(&created).await?;

        info!(service_id = %ctx.service_id(), created = created.len(), "Recreate complete");
        Ok(UpdateOutcome {
            created: created.len(),
            terminated: old.len(),
        })
    }

    fn name(&self) -> &'static str {
        "recreate"
    }
}
