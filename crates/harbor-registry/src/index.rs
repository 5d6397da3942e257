//! Status and type indexes over the catalog
//!
//! Every registration id lives in exactly one status bucket and exactly one
//! type bucket. [`RegistryIndex::validate`] cross-checks the buckets against
//! the stored records.

use harbor_types::{ServiceId, ServiceStatus, ServiceType};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Index inconsistency found by the validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IndexViolation {
    /// Stored record missing from the bucket of its status
    MissingStatus { service_id: ServiceId, status: ServiceStatus },
    /// Stored record missing from the bucket of its type
    MissingType { service_id: ServiceId, service_type: ServiceType },
    /// Bucket entry that does not match a stored record
    OrphanedStatus { service_id: ServiceId, status: ServiceStatus },
    /// Bucket entry that does not match a stored record
    OrphanedType { service_id: ServiceId, service_type: ServiceType },
}

/// Status and type buckets
#[derive(Debug, Default)]
pub struct RegistryIndex {
    by_status: HashMap<ServiceStatus, HashSet<ServiceId>>,
    by_type: HashMap<ServiceType, HashSet<ServiceId>>,
}

impl RegistryIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service to its status and type buckets
    pub fn insert(&mut self, id: ServiceId, status: ServiceStatus, service_type: ServiceType) {
        self.by_status.entry(status).or_default().insert(id);
        self.by_type.entry(service_type).or_default().insert(id);
    }

    /// Move a service between status buckets
    pub fn move_status(&mut self, id: ServiceId, from: ServiceStatus, to: ServiceStatus) {
        if let Some(bucket) = self.by_status.get_mut(&from) {
            bucket.remove(&id);
        }
        self.by_status.entry(to).or_default().insert(id);
    }

    /// Drop a service from both bucket maps
    pub fn remove(&mut self, id: ServiceId, status: ServiceStatus, service_type: ServiceType) {
        if let Some(bucket) = self.by_status.get_mut(&status) {
            bucket.remove(&id);
        }
        if let Some(bucket) = self.by_type.get_mut(&service_type) {
            bucket.remove(&id);
        }
    }

    /// Number of services in a status bucket
    pub fn count_status(&self, status: ServiceStatus) -> usize {
        self.by_status.get(&status).map_or(0, HashSet::len)
    }

    /// Number of services of a type
    pub fn count_type(&self, service_type: ServiceType) -> usize {
        self.by_type.get(&service_type).map_or(0, HashSet::len)
    }

    /// Ids currently in a status bucket
    pub fn ids_with_status(&self, status: ServiceStatus) -> Vec<ServiceId> {
        self.by_status
            .get(&status)
            .map(|bucket| bucket.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Compare the buckets against the actual `(id, status, type)` records.
    ///
    /// Returns an empty list when both indexes contain exactly the ids whose
    /// current status and type match.
    pub fn validate<I>(&self, records: I) -> Vec<IndexViolation>
    where
        I: IntoIterator<Item = (ServiceId, ServiceStatus, ServiceType)>,
    {
        let mut violations = Vec::new();
        let mut actual: HashMap<ServiceId, (ServiceStatus, ServiceType)> = HashMap::new();

        for (service_id, status, service_type) in records {
            actual.insert(service_id, (status, service_type));

            if !self
                .by_status
                .get(&status)
                .is_some_and(|bucket| bucket.contains(&service_id))
            {
                violations.push(IndexViolation::MissingStatus { service_id, status });
            }
            if !self
                .by_type
                .get(&service_type)
                .is_some_and(|bucket| bucket.contains(&service_id))
            {
                violations.push(IndexViolation::MissingType {
                    service_id,
                    service_type,
                });
            }
        }

        for (status, bucket) in &self.by_status {
            for service_id in bucket {
                if actual.get(service_id).map(|(s, _)| s) != Some(status) {
                    violations.push(IndexViolation::OrphanedStatus {
                        service_id: *service_id,
                        status: *status,
                    });
                }
            }
        }

        for (service_type, bucket) in &self.by_type {
            for service_id in bucket {
                if actual.get(service_id).map(|(_, t)| t) != Some(service_type) {
                    violations.push(IndexViolation::OrphanedType {
                        service_id: *service_id,
                        service_type: *service_type,
                    });
                }
            }
        }

        violations
    }
}
