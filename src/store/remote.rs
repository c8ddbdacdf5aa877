//! HTTP-forwarding store (`remote` mode).
//!
//! Every operation is mirrored onto another monitor instance's API. The
//! connection status tracks whether that API is reachable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{ConnectionStatus, MonitorStore, SnapshotContent, SnapshotFilter, StoreError};
use crate::config::{MonitorConfig, SnapshotStrategy};
use crate::monitor::now_millis;
use crate::monitor::records::{LogEntry, Snapshot, Step, Transaction, TransactionView};
use crate::query::{SearchParams, TransactionSearch};

pub struct RemoteStore {
    client: Client,
    base: Url,
    status: RwLock<ConnectionStatus>,
}

impl RemoteStore {
    /// Builds the client and probes `GET {api_url}/status`. An unreachable
    /// API is reported through the status, not as an error.
    pub async fn connect(config: &MonitorConfig) -> Result<Self, StoreError> {
        let api_url = config.api_url.as_deref().unwrap_or_default();
        let base = Url::parse(api_url).map_err(|_| StoreError::InvalidApiUrl(api_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::InvalidApiUrl(api_url.to_string()));
        }

        info!(
            api_url = %base,
            strategy = %config.snapshot_strategy,
            "Remote monitor mode forwards snapshots as-is; the configured snapshot strategy is ignored"
        );

        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        let store = Self {
            client,
            base,
            status: RwLock::new(ConnectionStatus::disconnected(now_millis(), "Not connected")),
        };
        store.reconnect().await;
        Ok(store)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidApiUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a request, updating the status on transport failures.
    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        match request.send().await {
            Ok(response) => {
                self.set_connected().await;
                Ok(response)
            }
            Err(err) => {
                self.set_disconnected(err.to_string()).await;
                Err(StoreError::Remote(err))
            }
        }
    }

    async fn set_connected(&self) {
        let mut status = self.status.write().await;
        if !status.connected {
            info!(api_url = %self.base, "Monitor API reachable");
            *status = ConnectionStatus::connected(now_millis());
        }
    }

    async fn set_disconnected(&self, detail: String) {
        let mut status = self.status.write().await;
        if status.connected {
            error!(api_url = %self.base, detail = %detail, "Monitor API unreachable");
        }
        *status = ConnectionStatus::disconnected(now_millis(), detail);
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), StoreError> {
        let url = self.endpoint(&[path])?;
        let response = self.send(self.client.post(url).json(body)).await?;
        let status = response.status();
        if !status.is_success() {
            warn!(path, status = status.as_u16(), "Monitor API rejected record");
            return Err(StoreError::RemoteStatus {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// `GET` returning `None` on 404.
    async fn get<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        query: Option<&Q>,
    ) -> Result<Option<T>, StoreError> {
        let url = self.endpoint(segments)?;
        let mut request = self.client.get(url);
        if let Some(query) = query {
            request = request.query(query);
        }

        let response = self.send(request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<T>().await?)),
            status => Err(StoreError::RemoteStatus {
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl MonitorStore for RemoteStore {
    async fn status(&self) -> ConnectionStatus {
        self.status.read().await.clone()
    }

    async fn reconnect(&self) -> ConnectionStatus {
        let probe = match self.endpoint(&["status"]) {
            Ok(url) => self.client.get(url).send().await,
            Err(err) => {
                self.set_disconnected(err.to_string()).await;
                return self.status().await;
            }
        };

        let status = match probe {
            Ok(response) if response.status().is_success() => {
                // Mirror the remote store's own state when it reports one.
                match response.json::<ConnectionStatus>().await {
                    Ok(remote) if !remote.connected => ConnectionStatus::disconnected(
                        now_millis(),
                        remote
                            .detail
                            .unwrap_or_else(|| "Remote monitor store is disconnected".to_string()),
                    ),
                    _ => ConnectionStatus::connected(now_millis()),
                }
            }
            Ok(response) => ConnectionStatus::disconnected(
                now_millis(),
                format!("Monitor API status probe returned {}", response.status()),
            ),
            Err(err) => ConnectionStatus::disconnected(now_millis(), err.to_string()),
        };

        if status.connected {
            info!(api_url = %self.base, "Connected to monitor API");
        } else {
            error!(api_url = %self.base, detail = ?status.detail, "Monitor API probe failed");
        }
        *self.status.write().await = status.clone();
        status
    }

    fn snapshot_strategy(&self) -> Option<SnapshotStrategy> {
        None
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        self.post("transactions", transaction).await
    }

    async fn insert_step(&self, step: &Step) -> Result<(), StoreError> {
        self.post("steps", step).await
    }

    async fn insert_logs(&self, logs: &[LogEntry]) -> Result<(), StoreError> {
        if logs.is_empty() {
            return Ok(());
        }
        self.post("logs", logs).await
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.post("snapshots", snapshot).await
    }

    async fn query_transactions(
        &self,
        search: &TransactionSearch,
    ) -> Result<Vec<TransactionView>, StoreError> {
        let params = SearchParams::from(search);
        let views = self
            .get::<Vec<TransactionView>, _>(&["transactions"], Some(&params))
            .await?;
        Ok(views.unwrap_or_default())
    }

    async fn query_transaction_by_id(
        &self,
        id: &str,
    ) -> Result<Option<TransactionView>, StoreError> {
        self.get::<TransactionView, ()>(&["transactions", id], None)
            .await
    }

    async fn query_snapshots_for_transaction(
        &self,
        transaction: &str,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let snapshots = self
            .get::<Vec<Snapshot>, ()>(&["transactions", transaction, "snapshots"], None)
            .await?;
        Ok(snapshots.unwrap_or_default())
    }

    async fn get_snapshot_by_id(&self, id: &str) -> Result<Option<SnapshotContent>, StoreError> {
        let snapshot = self.get::<Snapshot, ()>(&["snapshots", id], None).await?;
        debug!(snapshot_id = id, found = snapshot.is_some(), "Fetched remote snapshot");
        Ok(snapshot.map(SnapshotContent::Document))
    }

    async fn find_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>, StoreError> {
        let snapshots = self
            .get::<Vec<Snapshot>, _>(&["snapshots"], Some(filter))
            .await?;
        Ok(snapshots.unwrap_or_default())
    }
}
