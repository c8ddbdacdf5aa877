//! # Monitor Query Handlers
//!
//! Read side of the monitor API: connection status, transaction search,
//! single transactions and snapshots.

use axum::{
    body::Body,
    extract::{
        Path, Query, State,
        rejection::QueryRejection,
    },
    http::header,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::monitor::records::{Snapshot, TransactionView};
use crate::query::{SearchParams, TransactionSearch};
use crate::server::AppState;
use crate::store::{ConnectionStatus, SnapshotContent, SnapshotFilter};

/// Status payload of the monitor root
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub connection: ConnectionStatus,
}

/// Monitor root: connection status of the configured store
#[utoipa::path(
    get,
    path = "/monitor",
    responses(
        (status = 200, description = "Store connection status", body = StatusResponse)
    ),
    tag = "monitor"
)]
pub async fn monitor_root(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        connection: state.store.status().await,
    })
}

/// Connection status of the configured store
#[utoipa::path(
    get,
    path = "/monitor/status",
    responses(
        (status = 200, description = "Store connection status", body = ConnectionStatus)
    ),
    tag = "monitor"
)]
pub async fn status(State(state): State<AppState>) -> Json<ConnectionStatus> {
    Json(state.store.status().await)
}

/// Re-establishes the store connection
#[utoipa::path(
    post,
    path = "/monitor/reconnect",
    responses(
        (status = 200, description = "Store connection status after reconnecting", body = StatusResponse)
    ),
    tag = "monitor"
)]
pub async fn reconnect(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        connection: state.store.reconnect().await,
    })
}

/// Searches transactions, newest first
///
/// `q` in `DD.MM.YYYY` form selects one UTC day; anything else is a
/// case-insensitive regular expression.
#[utoipa::path(
    get,
    path = "/monitor/transactions",
    params(SearchParams),
    responses(
        (status = 200, description = "Matching transactions with steps and logs", body = Vec<TransactionView>),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 500, description = "Store unavailable or query failed", body = ApiError)
    ),
    tag = "monitor"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    query: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<TransactionView>>, ApiError> {
    let Query(params) = query?;
    let search = TransactionSearch::from(params);
    let views = state.store.query_transactions(&search).await?;
    Ok(Json(views))
}

/// One transaction with steps, logs and snapshots
#[utoipa::path(
    get,
    path = "/monitor/transactions/{id}",
    params(("id" = String, Path, description = "Transaction (message) id")),
    responses(
        (status = 200, description = "Transaction found", body = TransactionView),
        (status = 404, description = "Unknown transaction", body = ApiError),
        (status = 500, description = "Store unavailable", body = ApiError)
    ),
    tag = "monitor"
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TransactionView>, ApiError> {
    state
        .store
        .query_transaction_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Transaction {} not found", id)))
}

/// Snapshots of one transaction, newest first
#[utoipa::path(
    get,
    path = "/monitor/transactions/{id}/snapshots",
    params(("id" = String, Path, description = "Transaction (message) id")),
    responses(
        (status = 200, description = "Snapshots of the transaction", body = Vec<Snapshot>),
        (status = 500, description = "Store unavailable", body = ApiError)
    ),
    tag = "monitor"
)]
pub async fn transaction_snapshots(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Snapshot>>, ApiError> {
    Ok(Json(state.store.query_snapshots_for_transaction(&id).await?))
}

/// One snapshot by id
///
/// Blob-stored snapshots are streamed back as raw JSON.
#[utoipa::path(
    get,
    path = "/monitor/snapshots/{id}",
    params(("id" = String, Path, description = "Snapshot id (message id, node id and port)")),
    responses(
        (status = 200, description = "Snapshot found", body = Snapshot),
        (status = 404, description = "Unknown snapshot", body = ApiError),
        (status = 500, description = "Store unavailable", body = ApiError)
    ),
    tag = "monitor"
)]
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.get_snapshot_by_id(&id).await? {
        Some(SnapshotContent::Document(snapshot)) => Ok(Json(snapshot).into_response()),
        Some(SnapshotContent::Blob(chunks)) => Ok((
            [(header::CONTENT_TYPE, "application/json")],
            Body::from_stream(chunks),
        )
            .into_response()),
        None => Err(ApiError::not_found(format!("Snapshot {} not found", id))),
    }
}

/// Snapshots matching the given criteria
#[utoipa::path(
    get,
    path = "/monitor/snapshots",
    params(SnapshotFilter),
    responses(
        (status = 200, description = "Matching snapshots", body = Vec<Snapshot>),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 500, description = "Store unavailable", body = ApiError)
    ),
    tag = "monitor"
)]
pub async fn find_snapshots(
    State(state): State<AppState>,
    query: Result<Query<SnapshotFilter>, QueryRejection>,
) -> Result<Json<Vec<Snapshot>>, ApiError> {
    let Query(filter) = query?;
    Ok(Json(state.store.find_snapshots(&filter).await?))
}
