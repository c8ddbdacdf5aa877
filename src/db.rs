//! Database connection and pool management for the direct monitor store.
//!
//! Opens a SeaORM pool against Postgres (or SQLite in tests), retrying with
//! exponential backoff, and applies the schema migrations.

use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::{ConfigError, MonitorConfig};

const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Errors that can occur while establishing the database pool.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: DbErr,
    },
    #[error("Database migration failed: {0}")]
    Migration(DbErr),
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Pool parameters for the direct store.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl TryFrom<&MonitorConfig> for PoolSettings {
    type Error = ConfigError;

    fn try_from(cfg: &MonitorConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            url: cfg.connection_url()?,
            max_connections: cfg.db_max_connections,
            acquire_timeout: Duration::from_millis(cfg.db_acquire_timeout_ms),
        })
    }
}

/// Initializes a database connection pool, retrying transient failures.
pub async fn init_pool(settings: &PoolSettings) -> Result<DatabaseConnection, DatabaseError> {
    if settings.url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        });
    }

    let mut opt = ConnectOptions::new(&settings.url);
    opt.max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let mut retry_delay = Duration::from_millis(100);
    let mut attempt = 1;

    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("Connected to monitor database (attempt {})", attempt);
                return Ok(conn);
            }
            Err(e) if attempt >= MAX_CONNECT_ATTEMPTS => {
                log::error!(
                    "Failed to connect to monitor database after {} attempts: {}",
                    MAX_CONNECT_ATTEMPTS,
                    e
                );
                return Err(DatabaseError::ConnectionFailed { source: e });
            }
            Err(e) => {
                log::warn!(
                    "Database connection attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    retry_delay
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Applies all pending schema migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DatabaseError> {
    Migrator::up(db, None)
        .await
        .map_err(DatabaseError::Migration)
}

/// Verifies that the connection is still usable by executing a trivial query.
pub async fn health_check(db: &DatabaseConnection) -> Result<(), DbErr> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt).await?;
    Ok(())
}
