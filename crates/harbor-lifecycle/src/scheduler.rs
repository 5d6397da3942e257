//! Deferred lifecycle operations
//!
//! Each scheduled action runs on its own task that sleeps until the due
//! time. Cancelling removes the action and wakes the task; whichever side
//! removes the action from the pending map first wins.

use crate::error::{LifecycleError, Result};
use crate::manager::LifecycleManager;
use chrono::{DateTime, Utc};
use harbor_types::{ActionId, EventSource, HarborEvent, ServiceId, ServiceRegistration, UpdateStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Operation to run later
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleAction {
    Start,
    Stop {
        graceful: bool,
    },
    Restart,
    Scale {
        target: u32,
    },
    Update {
        registration: Box<ServiceRegistration>,
        #[serde(default)]
        strategy: Option<UpdateStrategy>,
    },
}

impl LifecycleAction {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop { .. } => "stop",
            LifecycleAction::Restart => "restart",
            LifecycleAction::Scale { .. } => "scale",
            LifecycleAction::Update { .. } => "update",
        }
    }
}

/// A pending deferred operation
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledAction {
    pub id: ActionId,
    pub service_id: ServiceId,
    pub action: LifecycleAction,
    /// Due time; past times run immediately
    pub at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
}

pub(crate) struct PendingAction {
    pub action: ScheduledAction,
    pub cancel: CancellationToken,
}

impl LifecycleManager {
    /// Run `action` on `service_id` at `at`
    #[instrument(skip(self, action), fields(service_id = %service_id, action = action.name()))]
    pub fn schedule_action(
        self: &Arc<Self>,
        service_id: ServiceId,
        action: LifecycleAction,
        at: DateTime<Utc>,
    ) -> Result<ActionId> {
        self.entry(service_id)?;

        let scheduled = ScheduledAction {
            id: ActionId::generate(),
            service_id,
            action,
            at,
            scheduled_at: Utc::now(),
        };
        let id = scheduled.id;
        let cancel = self.cancel.child_token();
        self.actions.insert(
            id,
            PendingAction {
                action: scheduled.clone(),
                cancel: cancel.clone(),
            },
        );

        info!(action_id = %id, %at, "Action scheduled");
        self.emit(
            EventSource::Scheduler,
            HarborEvent::ActionScheduled {
                action_id: id,
                service_id,
                action: scheduled.action.name().to_string(),
                at,
            },
        );

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_scheduled(scheduled, cancel).await;
        });
        Ok(id)
    }

    /// Drop a pending action before it runs
    pub fn cancel_action(&self, action_id: ActionId) -> Result<()> {
        let (_, pending) = self
            .actions
            .remove(&action_id)
            .ok_or(LifecycleError::ActionNotFound(action_id))?;
        pending.cancel.cancel();

        info!(action_id = %action_id, "Action cancelled");
        self.emit(
            EventSource::Scheduler,
            HarborEvent::ActionCancelled {
                action_id,
                service_id: pending.action.service_id,
            },
        );
        Ok(())
    }

    /// Pending actions, earliest first
    pub fn pending_actions(&self) -> Vec<ScheduledAction> {
        let mut pending: Vec<ScheduledAction> = self
            .actions
            .iter()
            .map(|entry| entry.action.clone())
            .collect();
        pending.sort_by_key(|action| action.at);
        pending
    }

    async fn run_scheduled(&self, scheduled: ScheduledAction, cancel: CancellationToken) {
        let delay = (scheduled.at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        if self.actions.remove(&scheduled.id).is_none() {
            return;
        }

        let action_id = scheduled.id;
        let service_id = scheduled.service_id;
        match self.execute_action(service_id, scheduled.action).await {
            Ok(()) => {
                info!(action_id = %action_id, service_id = %service_id, "Action executed");
                self.emit(
                    EventSource::Scheduler,
                    HarborEvent::ActionExecuted {
                        action_id,
                        service_id,
                    },
                );
            }
            Err(e) => {
                warn!(action_id = %action_id, service_id = %service_id, error = %e, "Action failed");
                self.emit(
                    EventSource::Scheduler,
                    HarborEvent::ActionFailed {
                        action_id,
                        service_id,
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    async fn execute_action(&self, service_id: ServiceId, action: LifecycleAction) -> Result<()> {
        match action {
            LifecycleAction::Start => self.start_service(service_id).await,
            LifecycleAction::Stop { graceful } => self.stop_service(service_id, graceful).await,
            LifecycleAction::Restart => self.restart_service(service_id).await,
            LifecycleAction::Scale { target } => self.scale_service(service_id, target).await,
            LifecycleAction::Update {
                registration,
                strategy,
            } => {
                self.update_service(service_id, *registration, strategy)
                    .await
            }
        }
    }
}
