//! Catalog search: filters, sorting and pagination

use chrono::{DateTime, Utc};
use harbor_types::{ServiceRegistration, ServiceStatus, ServiceType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Search filters; all present criteria must match
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
    /// Exact service type
    pub service_type: Option<ServiceType>,

    /// Exact status; asking for `Inactive` or `Deprecated` here opts them in
    pub status: Option<ServiceStatus>,

    /// Exact metadata category
    pub category: Option<String>,

    /// All of these tags must be present
    pub tags: Vec<String>,

    /// All of these capabilities must be present
    pub capabilities: Vec<String>,

    /// Exact metadata author
    pub author: Option<String>,

    /// Registered at or after this instant
    pub registered_after: Option<DateTime<Utc>>,

    /// Registered at or before this instant
    pub registered_before: Option<DateTime<Utc>>,

    /// Include unregistered tombstones
    pub include_inactive: bool,

    /// Include deprecated services
    pub include_deprecated: bool,
}

impl SearchFilter {
    /// Whether a registration satisfies every present criterion
    pub fn matches(&self, registration: &ServiceRegistration) -> bool {
        let status = registration.status;
        let explicitly_requested = self.status == Some(status);

        if status == ServiceStatus::Inactive && !self.include_inactive && !explicitly_requested {
            return false;
        }
        if status == ServiceStatus::Deprecated && !self.include_deprecated && !explicitly_requested
        {
            return false;
        }
        if self.status.is_some_and(|wanted| wanted != status) {
            return false;
        }
        if self
            .service_type
            .is_some_and(|wanted| wanted != registration.service_type)
        {
            return false;
        }

        let metadata = &registration.metadata;
        if let Some(category) = &self.category {
            if metadata.category.as_ref() != Some(category) {
                return false;
            }
        }
        if let Some(author) = &self.author {
            if metadata.author.as_ref() != Some(author) {
                return false;
            }
        }
        if !self.tags.iter().all(|tag| metadata.tags.contains(tag)) {
            return false;
        }
        if !self
            .capabilities
            .iter()
            .all(|capability| metadata.capabilities.contains(capability))
        {
            return false;
        }
        if self
            .registered_after
            .is_some_and(|after| registration.registered_at < after)
        {
            return false;
        }
        if self
            .registered_before
            .is_some_and(|before| registration.registered_at > before)
        {
            return false;
        }
        true
    }
}

/// Sort key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Metadata name
    #[default]
    Name,
    /// Registration time
    RegisteredAt,
    /// Last modification time
    UpdatedAt,
    /// Lifecycle status
    Status,
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest first
    #[default]
    Asc,
    /// Largest first
    Desc,
}

/// Sorting and pagination
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Field to sort on
    pub sort_by: SortField,
    /// Ascending or descending
    pub order: SortOrder,
    /// Matches to skip
    pub offset: usize,
    /// Page size; `None` returns every remaining match
    pub limit: Option<usize>,
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// The requested page
    pub services: Vec<ServiceRegistration>,

    /// Matches before pagination
    pub total: usize,
}

/// Filter, sort and paginate a snapshot of registrations
pub fn run(
    registrations: impl IntoIterator<Item = ServiceRegistration>,
    filter: &SearchFilter,
    options: &SearchOptions,
) -> SearchResult {
    let mut matched: Vec<ServiceRegistration> = registrations
        .into_iter()
        .filter(|registration| filter.matches(registration))
        .collect();

    matched.sort_by(|a, b| {
        let ordering = compare(a, b, options.sort_by).then_with(|| a.id.cmp(&b.id));
        match options.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });

    let total = matched.len();
    let services = matched
        .into_iter()
        .skip(options.offset)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect();

    SearchResult { services, total }
}

fn compare(a: &ServiceRegistration, b: &ServiceRegistration, field: SortField) -> Ordering {
    match field {
        SortField::Name => a.metadata.name.cmp(&b.metadata.name),
        SortField::RegisteredAt => a.registered_at.cmp(&b.registered_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Status => a.status.cmp(&b.status),
    }
}
