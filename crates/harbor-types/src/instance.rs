//! Instance types for individual service replicas
//!
//! A ServiceInstance is one running replica of a registration, owned
//! exclusively by the lifecycle manager.

use crate::{Endpoint, InstanceId, ServiceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A running service replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Unique instance identifier
    pub id: InstanceId,

    /// Owning service
    pub service_id: ServiceId,

    /// Registration version this replica runs
    pub version: String,

    /// Instance lifecycle phase
    pub phase: InstancePhase,

    /// Address the replica is reachable at
    pub endpoint: Endpoint,

    /// Last observed health
    pub health: InstanceHealth,

    /// Last observed resource usage
    pub resources: ResourceUsage,

    /// Free-form labels attached by the driver
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ServiceInstance {
    pub fn new(service_id: ServiceId, version: impl Into<String>, endpoint: Endpoint) -> Self {
        let now = Utc::now();
        Self {
            id: InstanceId::generate(),
            service_id,
            version: version.into(),
            phase: InstancePhase::Starting,
            endpoint,
            health: InstanceHealth::Unknown,
            resources: ResourceUsage::default(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == InstanceHealth::Healthy
    }
}

/// Instance lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstancePhase {
    /// Launched, not yet reporting healthy
    Starting,
    /// Serving traffic
    Running,
    /// Told to stop accepting new work
    Draining,
    /// Being torn down
    Terminating,
    /// Gone
    Terminated,
    /// Launch or runtime failure
    Failed,
}

impl fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstancePhase::Starting => "starting",
            InstancePhase::Running => "running",
            InstancePhase::Draining => "draining",
            InstancePhase::Terminating => "terminating",
            InstancePhase::Terminated => "terminated",
            InstancePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Health verdict of a single instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for InstanceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceHealth::Unknown => "unknown",
            InstanceHealth::Healthy => "healthy",
            InstanceHealth::Unhealthy => "unhealthy",
        };
        f.write_str(name)
    }
}

/// Utilization snapshot, percentages in `0.0..=100.0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

impl ResourceUsage {
    pub fn new(cpu_percent: f64, memory_percent: f64, disk_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            disk_percent,
        }
    }

    /// Mean cpu and memory utilization over a set of instances
    pub fn mean<'a, I>(usages: I) -> Option<(f64, f64)>
    where
        I: IntoIterator<Item = &'a ResourceUsage>,
    {
        let (count, cpu, memory) = usages
            .into_iter()
            .fold((0usize, 0.0, 0.0), |(n, cpu, mem), usage| {
                (n + 1, cpu + usage.cpu_percent, mem + usage.memory_percent)
            });
        if count == 0 {
            None
        } else {
            Some((cpu / count as f64, memory / count as f64))
        }
    }
}
