//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/registry/statistics", get(handlers::registry_statistics))
        // Services
        .route("/services", get(handlers::list_services))
        .route("/services/:id", get(handlers::get_service))
        .route("/services/:id/status", get(handlers::get_service_status))
        .route("/services/:id/instances", get(handlers::list_service_instances))
        // Lifecycle history and scheduled actions
        .route("/events", get(handlers::get_events))
        .route("/actions", get(handlers::list_actions))
        // Transport
        .route("/transport", get(handlers::transport_statistics));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
