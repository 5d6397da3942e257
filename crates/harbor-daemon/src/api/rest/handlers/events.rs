//! Lifecycle history and scheduled action handlers

use super::parse_service_id;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Query, State},
    Json,
};
use harbor_lifecycle::ScheduledAction;
use harbor_types::LifecycleEvent;
use serde::Deserialize;

/// Events query params
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub service_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// Recent phase transitions, newest last
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<LifecycleEvent>>> {
    let service_id = query
        .service_id
        .as_deref()
        .map(parse_service_id)
        .transpose()?;

    Ok(Json(
        state
            .lifecycle
            .get_lifecycle_events(service_id, Some(query.limit)),
    ))
}

/// Pending scheduled actions, earliest first
pub async fn list_actions(State(state): State<AppState>) -> Json<Vec<ScheduledAction>> {
    Json(state.lifecycle.pending_actions())
}
