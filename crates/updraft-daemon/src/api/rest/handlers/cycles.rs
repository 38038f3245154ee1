//! Manual cycle handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use crate::scheduler::{CycleKind, CycleReport};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Cycle trigger query params
#[derive(Debug, Deserialize)]
pub struct RunCycleQuery {
    /// Hold the request until the run finishes and return its report
    #[serde(default)]
    pub wait: bool,
}

/// Response for a run started in the background
#[derive(Debug, Serialize)]
pub struct CycleStartedResponse {
    pub cycles: Vec<CycleKind>,
    pub started: bool,
}

/// Run one cycle
pub async fn run_cycle(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<RunCycleQuery>,
) -> ApiResult<Response> {
    let kind: CycleKind = kind.parse()?;

    if query.wait {
        let report: CycleReport = state.scheduler.run_cycle(kind).await;
        return Ok(Json(report).into_response());
    }

    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        scheduler.run_cycle(kind).await;
    });
    Ok(started(vec![kind]))
}

/// Run detect, fetch and deploy in order
pub async fn run_all_cycles(
    State(state): State<AppState>,
    Query(query): Query<RunCycleQuery>,
) -> ApiResult<Response> {
    if query.wait {
        let reports = state.scheduler.run_all().await;
        return Ok(Json(reports).into_response());
    }

    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        scheduler.run_all().await;
    });
    Ok(started(CycleKind::ALL.to_vec()))
}

fn started(cycles: Vec<CycleKind>) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(CycleStartedResponse {
            cycles,
            started: true,
        }),
    )
        .into_response()
}
