//! Prompt board handlers

use crate::api::rest::state::AppState;
use crate::board::PromptView;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use updraft_approval::Signal;
use updraft_types::MessageId;

/// List prompts query params
#[derive(Debug, Deserialize)]
pub struct ListPromptsQuery {
    /// Only prompts still accepting signals
    #[serde(default)]
    pub open: bool,
}

/// List prompts, newest first
pub async fn list_prompts(
    State(state): State<AppState>,
    Query(query): Query<ListPromptsQuery>,
) -> Json<Vec<PromptView>> {
    let prompts = state
        .board
        .list()
        .into_iter()
        .filter(|p| !query.open || p.open)
        .collect();
    Json(prompts)
}

/// Get a specific prompt
pub async fn get_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PromptView>> {
    state
        .board
        .get(&MessageId::from(id.as_str()))
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Prompt {} not found", id)))
}

/// Signal request
#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    /// `proceed`, `override` or `dismiss`, or the matching glyph
    pub signal: String,
    pub actor: String,
}

/// Attach a signal to an open prompt
pub async fn post_signal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SignalRequest>,
) -> ApiResult<StatusCode> {
    let signal = Signal::parse(&request.signal)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown signal: {}", request.signal)))?;
    if request.actor.trim().is_empty() {
        return Err(ApiError::BadRequest("Actor is required".to_string()));
    }

    state
        .board
        .signal(&MessageId::from(id.as_str()), signal, request.actor.trim())?;
    Ok(StatusCode::ACCEPTED)
}
