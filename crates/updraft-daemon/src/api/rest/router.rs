//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        // Artifacts
        .route("/artifacts", get(handlers::list_artifacts))
        .route("/artifacts/:kind/:key", get(handlers::get_artifact))
        .route("/artifacts/:kind/:key/approval", post(handlers::request_approval))
        // Servers
        .route("/servers", get(handlers::list_servers))
        .route("/servers/:name", get(handlers::get_server))
        // Prompts
        .route("/prompts", get(handlers::list_prompts))
        .route("/prompts/:id", get(handlers::get_prompt))
        .route("/prompts/:id/signals", post(handlers::post_signal))
        // Cycles
        .route("/cycles/run", post(handlers::run_all_cycles))
        .route("/cycles/:kind", post(handlers::run_cycle))
        // Events
        .route("/events", get(handlers::get_events))
        .route("/events/stream", get(handlers::stream_events));

    // Build router with middleware
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
