//! Service catalog and lifecycle handlers

use super::parse_service_id;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use harbor_lifecycle::ServiceStatusReport;
use harbor_registry::{SearchFilter, SearchOptions, SearchResult, SortField, SortOrder};
use harbor_types::{ServiceInstance, ServiceRegistration, ServiceStatus, ServiceType};
use serde::Deserialize;

/// List services query params
#[derive(Debug, Default, Deserialize)]
pub struct ListServicesQuery {
    pub service_type: Option<ServiceType>,
    pub status: Option<ServiceStatus>,
    pub category: Option<String>,
    /// Single required tag
    pub tag: Option<String>,
    pub capability: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default)]
    pub include_deprecated: bool,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ListServicesQuery {
    fn into_search(self) -> (SearchFilter, SearchOptions) {
        let filter = SearchFilter {
            service_type: self.service_type,
            status: self.status,
            category: self.category,
            tags: self.tag.into_iter().collect(),
            capabilities: self.capability.into_iter().collect(),
            include_inactive: self.include_inactive,
            include_deprecated: self.include_deprecated,
            ..SearchFilter::default()
        };
        let options = SearchOptions {
            sort_by: self.sort_by,
            order: self.order,
            offset: self.offset,
            limit: self.limit,
        };
        (filter, options)
    }
}

/// Search the catalog
pub async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<ListServicesQuery>,
) -> Json<SearchResult> {
    let (filter, options) = query.into_search();
    Json(state.registry.search_services(&filter, &options))
}

/// Get a catalog entry, tombstones included
pub async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServiceRegistration>> {
    let service_id = parse_service_id(&id)?;
    Ok(Json(state.registry.get_service(service_id)?))
}

/// Lifecycle view of a managed service
pub async fn get_service_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServiceStatusReport>> {
    let service_id = parse_service_id(&id)?;
    Ok(Json(state.lifecycle.get_service_status(service_id).await?))
}

/// Instance pool of a managed service, oldest first
pub async fn list_service_instances(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ServiceInstance>>> {
    let service_id = parse_service_id(&id)?;
    Ok(Json(state.lifecycle.get_service_instances(service_id).await?))
}
