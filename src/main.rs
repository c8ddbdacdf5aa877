//! # Flow Monitor Main Entry Point
//!
//! Loads configuration, wires the store, correlation workers and replay
//! service together and serves the monitor API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use flow_monitor::{
    config::{AppConfig, ConfigLoader},
    db::{self, PoolSettings},
    monitor::{CorrelationTracker, Monitor, TrackerSettings, spawn_dispatcher},
    replay::ReplayService,
    server::{AppState, create_app, create_root_app, run_server},
    store::build_store,
    telemetry,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "flow-monitor", version, about = "Transaction monitor for flow-based runtimes")]
struct Cli {
    /// Directory holding the layered .env files
    #[arg(long, global = true)]
    env_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the monitor API (default)
    Serve,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let loader = match cli.env_dir {
        Some(dir) => ConfigLoader::with_base_dir(dir),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    info!(
        profile = %config.profile,
        mode = %config.monitor.mode,
        "Loaded configuration"
    );
    if let Ok(redacted_json) = config.redacted_json() {
        debug!(configuration = %redacted_json, "Effective configuration");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(&config).await,
    }
}

async fn migrate(config: &AppConfig) -> anyhow::Result<()> {
    if !config.monitor.mode.is_direct() {
        bail!(
            "migrations only apply to local and cloud modes (mode is {})",
            config.monitor.mode
        );
    }

    let settings =
        PoolSettings::try_from(&config.monitor).context("building database connection url")?;
    let db = db::init_pool(&settings)
        .await
        .context("initializing database connection pool")?;
    db::migrate(&db).await.context("applying migrations")?;
    info!("Migrations applied");
    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let shutdown = CancellationToken::new();

    let Some(store) = build_store(&config).await.context("building monitor store")? else {
        return run_server(&config, create_root_app(), shutdown)
            .await
            .map_err(|err| anyhow!("server error: {}", err));
    };

    let tracker = CorrelationTracker::new(TrackerSettings::from(&config.monitor));
    let monitor = Arc::new(Monitor::new(tracker, store.clone()));
    let (handle, workers) = spawn_dispatcher(
        monitor,
        config.monitor.workers,
        config.monitor.queue_capacity,
        shutdown.clone(),
    );
    let replay = Arc::new(ReplayService::from_config(&config.admin).context("building admin client")?);

    let state = AppState {
        config: config.clone(),
        store,
        monitor: handle,
        replay,
    };
    let result = run_server(&config, create_app(state), shutdown.clone()).await;

    shutdown.cancel();
    for worker in workers {
        if let Err(err) = worker.await {
            warn!(error = %err, "Monitor worker terminated abnormally");
        }
    }

    result.map_err(|err| anyhow!("server error: {}", err))
}
