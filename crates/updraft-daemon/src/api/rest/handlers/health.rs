//! Health and status handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub deploys_enabled: bool,
    pub stats: DaemonStats,
}

/// Daemon statistics
#[derive(Debug, Serialize)]
pub struct DaemonStats {
    pub configured_artifacts: usize,
    pub tracked_artifacts: usize,
    pub awaiting_approval: usize,
    pub awaiting_fetch: usize,
    pub servers: usize,
    pub open_prompts: usize,
}

/// Daemon status endpoint
pub async fn daemon_status(State(state): State<AppState>) -> ApiResult<Json<DaemonStatusResponse>> {
    let artifacts = state.registry.list(None).await?;
    let servers = state.registry.list_servers().await?;

    Ok(Json(DaemonStatusResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        deploys_enabled: state.deploys_enabled,
        stats: DaemonStats {
            configured_artifacts: state.catalog.artifacts().count(),
            tracked_artifacts: artifacts.len(),
            awaiting_approval: artifacts.iter().filter(|a| a.awaiting_approval()).count(),
            awaiting_fetch: artifacts.iter().filter(|a| a.needs_fetch()).count(),
            servers: servers.len(),
            open_prompts: state.board.list().iter().filter(|p| p.open).count(),
        },
    }))
}
