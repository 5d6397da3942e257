//! Transport layer handlers

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use harbor_transport::LayerStatistics;

/// Backend status and counters
pub async fn transport_statistics(State(state): State<AppState>) -> Json<LayerStatistics> {
    Json(state.transport.statistics().await)
}
