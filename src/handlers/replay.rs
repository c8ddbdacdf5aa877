//! # Replay Handler

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde_json::Value;

use crate::error::ApiError;
use crate::replay::{ReplayOutcome, ReplayRequest};
use crate::server::AppState;

/// Rebuilds the flow between two nodes and deploys it with a trigger
/// carrying the given payload
#[utoipa::path(
    post,
    path = "/monitor/replay/",
    request_body = ReplayRequest,
    responses(
        (status = 200, description = "Replay flow deployed", body = ReplayOutcome),
        (status = 400, description = "Missing mandatory fields", body = ApiError),
        (status = 500, description = "Reconstruction or deployment failed", body = ApiError)
    ),
    tag = "replay"
)]
pub async fn replay(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ReplayOutcome>, ApiError> {
    let Json(body) = payload?;
    let outcome = state.replay.replay(body).await?;
    Ok(Json(outcome))
}
