//! # Monitor Intake Handlers
//!
//! Write side of the monitor API. The record routes mirror the store
//! operations so that instances running in `remote` mode can forward to this
//! one; `/deliveries` accepts raw delivery events from a host adapter.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};

use crate::error::ApiError;
use crate::monitor::event::{DeliveryEvent, Message};
use crate::monitor::records::{LogEntry, Snapshot, Step, Transaction};
use crate::server::AppState;

/// Stores a closed transaction
#[utoipa::path(
    post,
    path = "/monitor/transactions",
    request_body = Transaction,
    responses(
        (status = 201, description = "Transaction stored"),
        (status = 400, description = "Malformed record", body = ApiError),
        (status = 500, description = "Store unavailable", body = ApiError)
    ),
    tag = "intake"
)]
pub async fn insert_transaction(
    State(state): State<AppState>,
    payload: Result<Json<Transaction>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(transaction) = payload?;
    state.store.insert_transaction(&transaction).await?;
    Ok(StatusCode::CREATED)
}

/// Stores a step
#[utoipa::path(
    post,
    path = "/monitor/steps",
    request_body = Step,
    responses(
        (status = 201, description = "Step stored"),
        (status = 400, description = "Malformed record", body = ApiError),
        (status = 500, description = "Store unavailable", body = ApiError)
    ),
    tag = "intake"
)]
pub async fn insert_step(
    State(state): State<AppState>,
    payload: Result<Json<Step>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(step) = payload?;
    state.store.insert_step(&step).await?;
    Ok(StatusCode::CREATED)
}

/// Stores a batch of log entries
#[utoipa::path(
    post,
    path = "/monitor/logs",
    request_body = Vec<LogEntry>,
    responses(
        (status = 201, description = "Log entries stored"),
        (status = 400, description = "Malformed record", body = ApiError),
        (status = 500, description = "Store unavailable", body = ApiError)
    ),
    tag = "intake"
)]
pub async fn insert_logs(
    State(state): State<AppState>,
    payload: Result<Json<Vec<LogEntry>>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(logs) = payload?;
    state.store.insert_logs(&logs).await?;
    Ok(StatusCode::CREATED)
}

/// Stores a snapshot
#[utoipa::path(
    post,
    path = "/monitor/snapshots",
    request_body = Snapshot,
    responses(
        (status = 201, description = "Snapshot stored"),
        (status = 400, description = "Malformed record", body = ApiError),
        (status = 500, description = "Store unavailable", body = ApiError)
    ),
    tag = "intake"
)]
pub async fn insert_snapshot(
    State(state): State<AppState>,
    payload: Result<Json<Snapshot>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(snapshot) = payload?;
    state.store.insert_snapshot(&snapshot).await?;
    Ok(StatusCode::CREATED)
}

/// Observes one hop of a message
///
/// Returns the message as it should continue through the flow, with its
/// `log` field cleared.
#[utoipa::path(
    post,
    path = "/monitor/deliveries",
    request_body = DeliveryEvent,
    responses(
        (status = 200, description = "Delivery observed", body = Message),
        (status = 400, description = "Malformed delivery event", body = ApiError),
        (status = 500, description = "Monitor shut down", body = ApiError)
    ),
    tag = "intake"
)]
pub async fn deliver(
    State(state): State<AppState>,
    payload: Result<Json<DeliveryEvent>, JsonRejection>,
) -> Result<Json<Message>, ApiError> {
    let Json(event) = payload?;
    let msg = state.monitor.deliver(event).await?;
    Ok(Json(msg))
}
