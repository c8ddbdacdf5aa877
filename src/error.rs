//! # Error Handling
//!
//! HTTP error envelope for the monitor API. Every failure is rendered as
//! `{ "msg": ..., "code": ..., "trace_id": ... }` with the trace id of the
//! current request.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::monitor::DispatchError;
use crate::replay::ReplayError;
use crate::store::StoreError;
use crate::telemetry;

/// Machine-readable error codes.
pub mod code {
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const STORE_DISCONNECTED: &str = "STORE_DISCONNECTED";
    pub const STORE_FAILED: &str = "STORE_FAILED";
    pub const INVALID_SEARCH: &str = "INVALID_SEARCH";
    pub const MONITOR_UNAVAILABLE: &str = "MONITOR_UNAVAILABLE";
    pub const REPLAY_FAILED: &str = "REPLAY_FAILED";
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Human-readable error message
    pub msg: Box<str>,
    /// One of the [`code`] constants
    pub code: Box<str>,
    /// Correlation id of the failed request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: msg.into().into_boxed_str(),
            code: code.into(),
            trace_id: telemetry::current_trace_id().map(String::into_boxed_str),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code::VALIDATION_FAILED, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code::NOT_FOUND, msg)
    }

    pub fn internal(code: &str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::bad_request(message)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(format!("Invalid query parameters: {}", rejection.body_text()))
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Disconnected => {
                tracing::warn!("Monitor store request while disconnected");
                Self::internal(code::STORE_DISCONNECTED, "Monitor store is not connected")
            }
            // Search failures are reported as server errors, like other store failures.
            StoreError::Query(query_err) => {
                tracing::warn!(error = %query_err, "Transaction query rejected");
                Self::internal(code::INVALID_SEARCH, query_err.to_string())
            }
            other => {
                tracing::error!(error = %other, "Monitor store operation failed");
                Self::internal(code::STORE_FAILED, other.to_string())
            }
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(error: DispatchError) -> Self {
        tracing::error!(error = %error, "Delivery could not be processed");
        Self::internal(code::MONITOR_UNAVAILABLE, error.to_string())
    }
}

impl From<ReplayError> for ApiError {
    fn from(error: ReplayError) -> Self {
        match error {
            ReplayError::MissingFields(_) | ReplayError::InvalidRequest(_) => {
                Self::bad_request(error.to_string())
            }
            other => {
                tracing::error!(error = %other, "Replay failed");
                Self::internal(code::REPLAY_FAILED, other.to_string())
            }
        }
    }
}
