//! Update strategy implementations

pub mod blue_green;
pub mod canary;
pub mod executor;
pub mod recreate;
pub mod rolling;

pub use blue_green::BlueGreenExecutor;
pub use canary::CanaryExecutor;
pub use executor::{UpdateExecutor, UpdateOutcome};
pub use recreate::RecreateExecutor;
pub use rolling::RollingExecutor;

use harbor_types::{UpdateConfig, UpdateStrategy};
use std::sync::Arc;

/// Factory for update executors
pub fn create_executor(strategy: UpdateStrategy, config: &UpdateConfig) -> Arc<dyn UpdateExecutor> {
    match strategy {
        UpdateStrategy::Rolling => Arc::new(RollingExecutor::new(
            config.max_surge as usize,
            config.max_unavailable as usize,
        )),
        UpdateStrategy::BlueGreen => Arc::new(BlueGreenExecutor::new()),
        UpdateStrategy::Canary => Arc::new(CanaryExecutor::new(
            config.canary_percent,
            config.stabilization_window,
            config.max_surge as usize,
            config.max_unavailable as usize,
        )),
        UpdateStrategy::Recreate => Arc::new(RecreateExecutor::new()),
    }
}
