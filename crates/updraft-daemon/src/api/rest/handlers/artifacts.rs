//! Artifact handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use updraft_registry::RegistryError;
use updraft_types::{ArtifactId, ArtifactKind, ArtifactRecord, MessageId};

/// List artifacts query params
#[derive(Debug, Deserialize)]
pub struct ListArtifactsQuery {
    pub kind: Option<String>,
}

/// List tracked artifacts
pub async fn list_artifacts(
    State(state): State<AppState>,
    Query(query): Query<ListArtifactsQuery>,
) -> ApiResult<Json<Vec<ArtifactRecord>>> {
    let kind = query.kind.as_deref().map(parse_kind).transpose()?;
    let records = state.registry.list(kind).await?;
    Ok(Json(records))
}

/// Get one artifact record
pub async fn get_artifact(
    State(state): State<AppState>,
    Path((kind, key)): Path<(String, String)>,
) -> ApiResult<Json<ArtifactRecord>> {
    let id = ArtifactId::new(parse_kind(&kind)?, key);
    let record = state
        .registry
        .get(&id)
        .await?
        .ok_or_else(|| RegistryError::artifact_not_found(&id))?;
    Ok(Json(record))
}

/// Approval request response
#[derive(Debug, Serialize)]
pub struct ApprovalRequestResponse {
    pub artifact: ArtifactId,
    pub message_id: MessageId,
}

/// Re-post the promotion prompt for an artifact still awaiting approval
pub async fn request_approval(
    State(state): State<AppState>,
    Path((kind, key)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<ApprovalRequestResponse>)> {
    let artifact = ArtifactId::new(parse_kind(&kind)?, key);
    let message_id = state.scheduler.reopen_approval(&artifact).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApprovalRequestResponse {
            artifact,
            message_id,
        }),
    ))
}

fn parse_kind(kind: &str) -> ApiResult<ArtifactKind> {
    kind.parse()
        .map_err(|e: updraft_types::ParseKindError| ApiError::BadRequest(e.to_string()))
}
