//! Update executor trait

use crate::context::OperationContext;
use crate::error::Result;
use async_trait::async_trait;
use harbor_types::ServiceInstance;
use serde::Serialize;

/// What an update did to the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub created: usize,
    pub terminated: usize,
}

/// Moves a service's pool from its current instances to the context's
/// target registration
#[async_trait]
pub trait UpdateExecutor: Send + Sync {
    /// Replace `current` with `desired` instances of the target registration
    async fn execute(
        &self,
        current: Vec<ServiceInstance>,
        desired: usize,
        ctx: &OperationContext,
    ) -> Result<UpdateOutcome>;

    /// Strategy name for logs
    fn name(&self) -> &'static str;
}
