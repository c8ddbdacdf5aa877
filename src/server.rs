//! # Server Configuration
//!
//! This module contains the router setup and server lifecycle for the flow
//! monitor API.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers::{self, ingest, monitor, replay};
use crate::monitor::MonitorHandle;
use crate::replay::ReplayService;
use crate::store::MonitorStore;
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn MonitorStore>,
    pub monitor: MonitorHandle,
    pub replay: Arc<ReplayService>,
}

/// Routes mounted under the monitor base path.
pub fn monitor_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(monitor::monitor_root))
        .route("/status", get(monitor::status))
        .route("/reconnect", post(monitor::reconnect))
        .route(
            "/transactions",
            get(monitor::list_transactions).post(ingest::insert_transaction),
        )
        .route("/transactions/{id}", get(monitor::get_transaction))
        .route(
            "/transactions/{id}/snapshots",
            get(monitor::transaction_snapshots),
        )
        .route(
            "/snapshots",
            get(monitor::find_snapshots).post(ingest::insert_snapshot),
        )
        .route("/snapshots/{id}", get(monitor::get_snapshot))
        .route("/steps", post(ingest::insert_step))
        .route("/logs", post(ingest::insert_logs))
        .route("/deliveries", post(ingest::deliver))
        .route("/replay", post(replay::replay))
        .route("/replay/", post(replay::replay))
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let base = state.config.monitor.base_path().to_string();
    let router = if base.is_empty() {
        monitor_routes()
    } else {
        Router::new()
            .route("/", get(handlers::root))
            .nest(&base, monitor_routes())
    };

    with_common_layers(router.with_state(state))
}

/// Router used when monitoring is off: service info and docs only.
pub fn create_root_app() -> Router {
    with_common_layers(Router::new().route("/", get(handlers::root)))
}

fn with_common_layers(router: Router) -> Router {
    router
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(telemetry::trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serves `app` until Ctrl+C or until `shutdown` is cancelled.
///
/// `shutdown` is cancelled on the way out so background workers stop too.
pub async fn run_server(
    config: &AppConfig,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    // Resolve the configured bind address
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Shutdown signal received"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::monitor::monitor_root,
        crate::handlers::monitor::status,
        crate::handlers::monitor::reconnect,
        crate::handlers::monitor::list_transactions,
        crate::handlers::monitor::get_transaction,
        crate::handlers::monitor::transaction_snapshots,
        crate::handlers::monitor::get_snapshot,
        crate::handlers::monitor::find_snapshots,
        crate::handlers::ingest::insert_transaction,
        crate::handlers::ingest::insert_step,
        crate::handlers::ingest::insert_logs,
        crate::handlers::ingest::insert_snapshot,
        crate::handlers::ingest::deliver,
        crate::handlers::replay::replay,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::store::ConnectionStatus,
            crate::handlers::monitor::StatusResponse,
            crate::monitor::records::NodeDescriptor,
            crate::monitor::records::Transaction,
            crate::monitor::records::Step,
            crate::monitor::records::LogEntry,
            crate::monitor::records::Snapshot,
            crate::monitor::records::TransactionView,
            crate::monitor::event::NodeInfo,
            crate::monitor::event::DeliverySource,
            crate::monitor::event::DeliveryDestination,
            crate::monitor::event::Message,
            crate::monitor::event::DeliveryEvent,
            crate::replay::ReplayRequest,
            crate::replay::ReplayOutcome,
            crate::replay::FlowDefinition,
        )
    ),
    tags(
        (name = "root", description = "Service information"),
        (name = "monitor", description = "Transaction status and search"),
        (name = "intake", description = "Record and delivery intake"),
        (name = "replay", description = "Transaction replay"),
    ),
    info(
        title = "Flow Monitor API",
        description = "Transaction correlation, search and replay for flow-based runtimes",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
