//! Health and status handlers

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use harbor_registry::RegistryStatistics;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub managed_services: usize,
    pub transport_connected: bool,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        managed_services: state.lifecycle.managed_services().len(),
        transport_connected: state.transport.is_connected().await,
    })
}

/// Catalog-wide counters
pub async fn registry_statistics(State(state): State<AppState>) -> Json<RegistryStatistics> {
    Json(state.registry.get_registry_statistics())
}
