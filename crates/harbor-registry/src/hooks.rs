//! Extension point run while a service is being unregistered

use async_trait::async_trait;
use harbor_types::ServiceRegistration;

/// Cleanup hooks invoked between `Unregistering` and `Inactive`
///
/// Failures are logged and do not block the unregistration.
#[async_trait]
pub trait RegistryHooks: Send + Sync {
    async fn on_unregister(&self, registration: &ServiceRegistration) -> Result<(), String>;
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl RegistryHooks for NoopHooks {
    async fn on_unregister(&self, _registration: &ServiceRegistration) -> Result<(), String> {
        Ok(())
    }
}
