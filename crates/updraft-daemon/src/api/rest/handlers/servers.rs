//! Server handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    Json,
};
use updraft_registry::RegistryError;
use updraft_types::{ServerName, ServerRecord};

/// List server records
pub async fn list_servers(State(state): State<AppState>) -> ApiResult<Json<Vec<ServerRecord>>> {
    Ok(Json(state.registry.list_servers().await?))
}

/// Get a specific server record
pub async fn get_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ServerRecord>> {
    let name = ServerName::from(name.as_str());
    let record = state
        .registry
        .get_server(&name)
        .await?
        .ok_or_else(|| RegistryError::server_not_found(&name))?;
    Ok(Json(record))
}
