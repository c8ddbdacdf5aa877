//! Tracing setup and per-request correlation ids.
//!
//! Every request runs inside a task-local [`TraceContext`]; error bodies and
//! log lines emitted while handling it carry the same id.

use std::any::type_name_of_val;
use std::sync::OnceLock;

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing::{Instrument, info_span};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Header carrying the request correlation id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Targets that are too chatty at the service's own level.
const QUIET_TARGETS: [&str; 3] = ["sqlx=warn", "sea_orm_migration=warn", "hyper_util=info"];

#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static SUBSCRIBER: OnceLock<()> = OnceLock::new();

/// Filter directives for `level`, with noisy dependencies turned down.
///
/// `RUST_LOG` replaces the whole filter when set.
pub fn default_filter(level: &str) -> String {
    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|d| d.to_string()));
    directives.join(",")
}

/// Installs the global subscriber once; later calls are no-ops.
///
/// `log` records (sqlx, sea-orm) are bridged into tracing first.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if SUBSCRIBER.get().is_some() {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!("Warning: log records will not reach the subscriber: {}", err);
        }
    }

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directives = default_filter(&config.log_level);
            EnvFilter::try_new(&directives).map_err(|err| TelemetryInitError::Filter {
                filter: directives,
                reason: err.to_string(),
            })?
        }
    };

    let fmt_layer = match config.log_format.as_str() {
        "json" => fmt::layer().json().with_current_span(true).boxed(),
        "compact" => fmt::layer().compact().boxed(),
        _ => fmt::layer().pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    let _ = SUBSCRIBER.set(());
    Ok(())
}

/// Runs `future` with `context` as the task's active trace context.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}

/// Middleware that runs each request inside a [`TraceContext`] and a
/// `request` span.
///
/// The id is taken from `x-request-id` when the caller supplies one and echoed
/// back on the response.
pub async fn trace_context_middleware(request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = info_span!(
        "request",
        request_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let context = TraceContext {
        trace_id: trace_id.clone(),
    };
    let mut response = with_trace_context(context, next.run(request))
        .instrument(span)
        .await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
