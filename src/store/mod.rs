//! # Monitor store
//!
//! Persistence of monitor records behind the [`MonitorStore`] trait. Two
//! implementations exist:
//!
//! - [`DirectStore`] talks to the database itself (`local` and `cloud` modes)
//! - [`RemoteStore`] forwards every call to another monitor instance over HTTP
//!   (`remote` mode)
//!
//! Both report a [`ConnectionStatus`] which is surfaced by the status route.

pub mod direct;
pub mod remote;
pub mod snapshots;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::BoxStream;
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::config::{AppConfig, SnapshotStrategy, StoreMode};
use crate::monitor::records::{LogEntry, Snapshot, Step, Transaction, TransactionView};
use crate::query::{QueryError, TransactionSearch};

pub use direct::DirectStore;
pub use remote::RemoteStore;

/// Status detail shown when production runs with the default credentials.
pub const ILLEGAL_DEFAULT_CREDENTIALS: &str = "Illegal use of default credentials. Disconnected";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("monitor store is not connected")]
    Disconnected,
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("monitor API request failed: {0}")]
    Remote(#[from] reqwest::Error),
    #[error("monitor API responded with status {status}")]
    RemoteStatus { status: u16 },
    #[error("invalid monitor API URL '{0}'")]
    InvalidApiUrl(String),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("failed to (de)serialize monitor record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("snapshot blob {file_id} is missing chunk {n}")]
    MissingChunk { file_id: String, n: i32 },
}

/// Connection state of the store, as reported to status listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Epoch milliseconds of the last state change
    pub connected_since: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ConnectionStatus {
    pub fn connected(since: i64) -> Self {
        Self {
            connected: true,
            connected_since: since,
            detail: None,
        }
    }

    pub fn disconnected(since: i64, detail: impl Into<String>) -> Self {
        Self {
            connected: false,
            connected_since: since,
            detail: Some(detail.into()),
        }
    }
}

/// Body of a snapshot lookup by id.
pub enum SnapshotContent {
    /// A structured snapshot record.
    Document(Snapshot),
    /// The raw JSON blob of a bucket-stored snapshot, streamed chunk by chunk.
    Blob(BoxStream<'static, Result<Bytes, StoreError>>),
}

impl std::fmt::Debug for SnapshotContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotContent::Document(snapshot) => {
                f.debug_tuple("Document").field(&snapshot.id).finish()
            }
            SnapshotContent::Blob(_) => f.write_str("Blob(..)"),
        }
    }
}

/// Query parameters of `GET /snapshots`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SnapshotFilter {
    pub id: Option<String>,
    pub transaction: Option<String>,
    pub node_type: Option<String>,
}

impl SnapshotFilter {
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        self.id.as_deref().is_none_or(|id| snapshot.id == id)
            && self
                .transaction
                .as_deref()
                .is_none_or(|tx| snapshot.transaction == tx)
            && self
                .node_type
                .as_deref()
                .is_none_or(|t| snapshot.node.node_type == t)
    }
}

/// Persistence and query operations over monitor records.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn status(&self) -> ConnectionStatus;

    /// Re-establishes the backend connection and returns the new status.
    async fn reconnect(&self) -> ConnectionStatus;

    /// Snapshot strategy in effect, `None` when snapshots are not stored locally.
    fn snapshot_strategy(&self) -> Option<SnapshotStrategy>;

    /// Upserts a closed transaction, unioning receivers with a stored copy.
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    /// Upserts a step by `(id, transaction)`.
    async fn insert_step(&self, step: &Step) -> Result<(), StoreError>;

    async fn insert_logs(&self, logs: &[LogEntry]) -> Result<(), StoreError>;

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Newest-first page of transactions joined with their steps and logs.
    async fn query_transactions(
        &self,
        search: &TransactionSearch,
    ) -> Result<Vec<TransactionView>, StoreError>;

    /// One transaction joined with steps, logs and snapshots.
    async fn query_transaction_by_id(&self, id: &str)
    -> Result<Option<TransactionView>, StoreError>;

    /// Snapshots of a transaction, newest first.
    async fn query_snapshots_for_transaction(
        &self,
        transaction: &str,
    ) -> Result<Vec<Snapshot>, StoreError>;

    async fn get_snapshot_by_id(&self, id: &str) -> Result<Option<SnapshotContent>, StoreError>;

    async fn find_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>, StoreError>;
}

/// Builds the store for the configured mode; `off` yields no store.
pub async fn build_store(config: &AppConfig) -> Result<Option<Arc<dyn MonitorStore>>, StoreError> {
    let monitor = &config.monitor;
    match monitor.mode {
        StoreMode::Off => {
            info!("Monitor mode is off; no store configured");
            Ok(None)
        }
        StoreMode::Local | StoreMode::Cloud => {
            let store = DirectStore::connect(config).await;
            Ok(Some(Arc::new(store)))
        }
        StoreMode::Remote => {
            let store = RemoteStore::connect(monitor).await?;
            Ok(Some(Arc::new(store)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::records::NodeDescriptor;
    use serde_json::json;

    fn snapshot(id: &str, tx: &str, node_type: &str) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            transaction: tx.to_string(),
            node: NodeDescriptor {
                id: "n".to_string(),
                node_type: node_type.to_string(),
                name: "n".to_string(),
            },
            created_at: 0,
            msg: json!({}),
        }
    }

    #[test]
    fn snapshot_filter_combines_criteria() {
        let filter = SnapshotFilter {
            transaction: Some("m1".to_string()),
            node_type: Some("http in".to_string()),
            ..SnapshotFilter::default()
        };

        assert!(filter.matches(&snapshot("m1-a-0", "m1", "http in")));
        assert!(!filter.matches(&snapshot("m1-b-0", "m1", "function")));
        assert!(!filter.matches(&snapshot("m2-a-0", "m2", "http in")));
        assert!(SnapshotFilter::default().matches(&snapshot("x", "y", "z")));
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = ConnectionStatus::disconnected(5, ILLEGAL_DEFAULT_CREDENTIALS);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["connected"], json!(false));
        assert_eq!(value["connectedSince"], json!(5));
        assert_eq!(value["detail"], json!(ILLEGAL_DEFAULT_CREDENTIALS));

        let value = serde_json::to_value(ConnectionStatus::connected(7)).unwrap();
        assert!(value.get("detail").is_none());
    }
}
