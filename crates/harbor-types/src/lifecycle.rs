//! Lifecycle phase machine and per-service policy objects
//!
//! Policies are attached to a service id and replaced wholesale; they are
//! validated when set, never partially mutated.

use crate::ServiceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stage of a service in the deployment state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Initializing,
    Starting,
    Running,
    Scaling,
    Updating,
    Stopping,
    Terminating,
    /// Resting phase after a completed stop
    Inactive,
    Error,
}

impl Phase {
    /// Legal successor phases
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        match self {
            Initializing => matches!(next, Starting | Stopping | Error),
            Starting => matches!(next, Running | Stopping | Error),
            Running => matches!(next, Scaling | Updating | Stopping | Error),
            Scaling => matches!(next, Running | Error),
            Updating => matches!(next, Running | Error),
            Stopping => matches!(next, Terminating | Error),
            Terminating => matches!(next, Inactive | Error),
            Inactive => matches!(next, Initializing | Starting),
            Error => matches!(next, Starting | Stopping | Updating),
        }
    }

    /// Phases in which instances are expected to be serving
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Running | Phase::Scaling | Phase::Updating)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initializing => "INITIALIZING",
            Phase::Starting => "STARTING",
            Phase::Running => "RUNNING",
            Phase::Scaling => "SCALING",
            Phase::Updating => "UPDATING",
            Phase::Stopping => "STOPPING",
            Phase::Terminating => "TERMINATING",
            Phase::Inactive => "INACTIVE",
            Phase::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Immutable record of one phase transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub service_id: ServiceId,

    pub phase: Phase,

    /// `None` only for the first event of a service
    pub previous_phase: Option<Phase>,

    pub timestamp: DateTime<Utc>,

    /// Failure detail when `phase` is `Error`
    pub error: Option<String>,
}

impl LifecycleEvent {
    pub fn new(service_id: ServiceId, phase: Phase, previous_phase: Option<Phase>) -> Self {
        Self {
            service_id,
            phase,
            previous_phase,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Instance-count policy of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(default = "default_min_instances")]
    pub min_instances: u32,

    #[serde(default = "default_max_instances")]
    pub max_instances: u32,

    /// Mean cpu utilization the auto-scaler aims for, in percent
    #[serde(default = "default_target_cpu")]
    pub target_cpu_percent: f64,

    /// Mean memory utilization the auto-scaler aims for, in percent
    #[serde(default = "default_target_memory")]
    pub target_memory_percent: f64,

    #[serde(default = "default_increment")]
    pub scale_up_increment: u32,

    #[serde(default = "default_increment")]
    pub scale_down_increment: u32,

    #[serde(default = "default_scale_up_cooldown", with = "crate::duration_serde")]
    pub scale_up_cooldown: Duration,

    #[serde(default = "default_scale_down_cooldown", with = "crate::duration_serde")]
    pub scale_down_cooldown: Duration,

    #[serde(default)]
    pub auto_scaling: bool,

    #[serde(default)]
    pub auto_healing: bool,
}

fn default_min_instances() -> u32 {
    1
}

fn default_max_instances() -> u32 {
    10
}

fn default_target_cpu() -> f64 {
    70.0
}

fn default_target_memory() -> f64 {
    80.0
}

fn default_increment() -> u32 {
    1
}

fn default_scale_up_cooldown() -> Duration {
    Duration::from_secs(180)
}

fn default_scale_down_cooldown() -> Duration {
    Duration::from_secs(300)
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_instances: default_min_instances(),
            max_instances: default_max_instances(),
            target_cpu_percent: default_target_cpu(),
            target_memory_percent: default_target_memory(),
            scale_up_increment: default_increment(),
            scale_down_increment: default_increment(),
            scale_up_cooldown: default_scale_up_cooldown(),
            scale_down_cooldown: default_scale_down_cooldown(),
            auto_scaling: false,
            auto_healing: false,
        }
    }
}

impl ScalingConfig {
    pub fn new(min_instances: u32, max_instances: u32) -> Self {
        Self {
            min_instances,
            max_instances,
            ..Default::default()
        }
    }

    pub fn with_auto_scaling(mut self, enabled: bool) -> Self {
        self.auto_scaling = enabled;
        self
    }

    pub fn with_auto_healing(mut self, enabled: bool) -> Self {
        self.auto_healing = enabled;
        self
    }

    pub fn with_cooldowns(mut self, scale_up: Duration, scale_down: Duration) -> Self {
        self.scale_up_cooldown = scale_up;
        self.scale_down_cooldown = scale_down;
        self
    }

    pub fn contains(&self, count: u32) -> bool {
        (self.min_instances..=self.max_instances).contains(&count)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_instances == 0 {
            return Err(ConfigValidationError::InvalidScaling(
                "max_instances must be at least 1".into(),
            ));
        }
        if self.min_instances > self.max_instances {
            return Err(ConfigValidationError::InvalidScaling(format!(
                "min_instances ({}) exceeds max_instances ({})",
                self.min_instances, self.max_instances
            )));
        }
        for (name, value) in [
            ("target_cpu_percent", self.target_cpu_percent),
            ("target_memory_percent", self.target_memory_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(ConfigValidationError::InvalidScaling(format!(
                    "{name} must be in (0, 100], got {value}"
                )));
            }
        }
        if self.scale_up_increment == 0 || self.scale_down_increment == 0 {
            return Err(ConfigValidationError::InvalidScaling(
                "scale increments must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Algorithm used to move a service to a new registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    #[default]
    Rolling,
    BlueGreen,
    Canary,
    Recreate,
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateStrategy::Rolling => "rolling",
            UpdateStrategy::BlueGreen => "blue_green",
            UpdateStrategy::Canary => "canary",
            UpdateStrategy::Recreate => "recreate",
        };
        f.write_str(name)
    }
}

/// Update policy of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default)]
    pub strategy: UpdateStrategy,

    /// Extra instances allowed above the desired count during a rolling update
    #[serde(default = "default_max_surge")]
    pub max_surge: u32,

    /// Instances allowed below the desired count during a rolling update
    #[serde(default = "default_max_unavailable")]
    pub max_unavailable: u32,

    /// Share of the current instance count started first by a canary update
    #[serde(default = "default_canary_percent")]
    pub canary_percent: u32,

    /// Observation window after canaries turn healthy
    #[serde(default = "default_stabilization", with = "crate::duration_serde")]
    pub stabilization_window: Duration,

    /// Upper bound for a whole update, and for each health wait inside it
    #[serde(default = "default_rollout_timeout", with = "crate::duration_serde")]
    pub rollout_timeout: Duration,

    #[serde(default = "default_rollback")]
    pub rollback_on_failure: bool,
}

fn default_max_surge() -> u32 {
    1
}

fn default_max_unavailable() -> u32 {
    1
}

fn default_canary_percent() -> u32 {
    20
}

fn default_stabilization() -> Duration {
    Duration::from_secs(300)
}

fn default_rollout_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_rollback() -> bool {
    true
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            strategy: UpdateStrategy::default(),
            max_surge: default_max_surge(),
            max_unavailable: default_max_unavailable(),
            canary_percent: default_canary_percent(),
            stabilization_window: default_stabilization(),
            rollout_timeout: default_rollout_timeout(),
            rollback_on_failure: default_rollback(),
        }
    }
}

impl UpdateConfig {
    pub fn with_strategy(mut self, strategy: UpdateStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_surge == 0 && self.max_unavailable == 0 {
            return Err(ConfigValidationError::InvalidUpdate(
                "max_surge and max_unavailable cannot both be 0".into(),
            ));
        }
        if self.canary_percent == 0 || self.canary_percent > 100 {
            return Err(ConfigValidationError::InvalidUpdate(format!(
                "canary_percent must be in 1..=100, got {}",
                self.canary_percent
            )));
        }
        if self.rollout_timeout.is_zero() {
            return Err(ConfigValidationError::InvalidUpdate(
                "rollout_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Policy validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid scaling config: {0}")]
    InvalidScaling(String),

    #[error("Invalid update config: {0}")]
    InvalidUpdate(String),
}
