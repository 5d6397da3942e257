//! Catalog-wide statistics

use harbor_types::{HealthState, ServiceRegistration, ServiceStatus, ServiceType};
use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregate view over every stored registration
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStatistics {
    /// Stored registrations, tombstones included
    pub total_services: usize,
    /// Count per lifecycle status
    pub by_status: BTreeMap<ServiceStatus, usize>,
    /// Count per service type
    pub by_type: BTreeMap<ServiceType, usize>,
    /// Services whose last check was healthy
    pub healthy: usize,
    /// Services answering with a high error rate
    pub degraded: usize,
    /// Services with no reachable endpoint
    pub unhealthy: usize,
    /// Services never checked
    pub unknown: usize,
    /// Requests recorded across all services
    pub total_requests: u64,
    /// Failed requests recorded across all services
    pub failed_requests: u64,
    /// Mean of the last probe response time over services that reported one
    pub average_response_time_ms: Option<f64>,
}

impl RegistryStatistics {
    /// Aggregate a set of registrations
    pub fn collect<'a>(registrations: impl IntoIterator<Item = &'a ServiceRegistration>) -> Self {
        let mut stats = Self::default();
        let mut response_sum = 0.0;
        let mut response_count = 0usize;

        for registration in registrations {
            stats.total_services += 1;
            *stats.by_status.entry(registration.status).or_default() += 1;
            *stats.by_type.entry(registration.service_type).or_default() += 1;

            match registration.health.state {
                HealthState::Healthy => stats.healthy += 1,
                HealthState::Degraded => stats.degraded += 1,
                HealthState::Unhealthy => stats.unhealthy += 1,
                HealthState::Unknown => stats.unknown += 1,
            }

            stats.total_requests += registration.statistics.total_requests;
            stats.failed_requests += registration.statistics.failed_requests;

            if let Some(response_time) = registration.health.response_time {
                response_sum += response_time.as_secs_f64() * 1000.0;
                response_count += 1;
            }
        }

        if response_count > 0 {
            stats.average_response_time_ms = Some(response_sum / response_count as f64);
        }
        stats
    }
}
