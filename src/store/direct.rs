//! Direct database store (`local` and `cloud` modes).
//!
//! Writes go straight to the monitor tables. Query pipelines run with the id
//! and day filters pushed into SQL; text filters are evaluated over joined
//! views in fixed-size batches.

use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ActiveValue::Set, ColumnTrait, DatabaseConnection,
    DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::snapshots::{SnapshotStore, snapshot_store_for};
use super::{
    ConnectionStatus, ILLEGAL_DEFAULT_CREDENTIALS, MonitorStore, SnapshotContent, SnapshotFilter,
    StoreError,
};
use crate::config::{AppConfig, SnapshotStrategy};
use crate::db::{self, DatabaseError, PoolSettings};
use crate::models::{LogEntryEntity, StepEntity, TransactionEntity, log_entry, step, transaction};
use crate::monitor::now_millis;
use crate::monitor::records::{
    LogEntry, NodeDescriptor, Snapshot, Step, Transaction, TransactionView,
};
use crate::query::{Collection, Filter, Pipeline, Plan, TransactionSearch};

/// Rows fetched per batch when a filter has to be evaluated in memory.
const SCAN_BATCH: u64 = 200;

/// Where [`MonitorStore::reconnect`] gets a fresh connection from.
enum Source {
    Pool(PoolSettings),
    Injected(DatabaseConnection),
    /// The configured settings cannot form a connection url.
    Misconfigured(String),
}

pub struct DirectStore {
    db: RwLock<Option<DatabaseConnection>>,
    status: RwLock<ConnectionStatus>,
    snapshots: Box<dyn SnapshotStore>,
    source: Source,
    credentials_refused: bool,
}

impl DirectStore {
    /// Opens the store. Never fails: connection problems are reported through
    /// [`MonitorStore::status`] and every operation returns
    /// [`StoreError::Disconnected`] until a reconnect succeeds.
    pub async fn connect(config: &AppConfig) -> Self {
        let monitor = &config.monitor;
        if monitor.uses_default_username() {
            warn!("Monitor database is configured with the default username");
        }
        if monitor.uses_default_password() {
            warn!("Monitor database is configured with the default password");
        }

        let store = Self {
            db: RwLock::new(None),
            status: RwLock::new(ConnectionStatus::disconnected(now_millis(), "Not connected")),
            snapshots: snapshot_store_for(monitor.snapshot_strategy),
            source: match PoolSettings::try_from(monitor) {
                Ok(settings) => Source::Pool(settings),
                Err(err) => Source::Misconfigured(err.to_string()),
            },
            credentials_refused: config.is_production()
                && monitor.uses_default_username()
                && monitor.uses_default_password(),
        };
        store.reconnect().await;
        store
    }

    /// Wraps an already migrated connection.
    ///
    /// A reconnect after a lost connection re-checks this same connection.
    pub fn with_connection(db: DatabaseConnection, strategy: SnapshotStrategy) -> Self {
        Self {
            db: RwLock::new(Some(db.clone())),
            status: RwLock::new(ConnectionStatus::connected(now_millis())),
            snapshots: snapshot_store_for(strategy),
            source: Source::Injected(db),
            credentials_refused: false,
        }
    }

    async fn connection(&self) -> Result<DatabaseConnection, StoreError> {
        self.db.read().await.clone().ok_or(StoreError::Disconnected)
    }

    /// Drops the connection when an operation fails with a connection error.
    ///
    /// Nothing is written again until [`MonitorStore::reconnect`] succeeds.
    async fn observe<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        match &result {
            Err(StoreError::Database(DbErr::Conn(err))) => {
                self.mark_disconnected(err.to_string()).await;
            }
            Err(StoreError::Database(DbErr::ConnectionAcquire(err))) => {
                self.mark_disconnected(err.to_string()).await;
            }
            _ => {}
        }
        result
    }

    async fn mark_disconnected(&self, detail: String) {
        *self.db.write().await = None;
        let mut status = self.status.write().await;
        if status.connected {
            error!(detail = %detail, "Monitor database connection lost");
            *status = ConnectionStatus::disconnected(now_millis(), detail);
        }
    }

    async fn run(&self, pipeline: &Pipeline) -> Result<Vec<TransactionView>, StoreError> {
        let plan = pipeline.plan()?;
        let db = self.connection().await?;
        let result = execute(&db, self.snapshots.as_ref(), &plan).await;
        self.observe(result).await
    }
}

async fn open(settings: &PoolSettings) -> Result<DatabaseConnection, DatabaseError> {
    let db = db::init_pool(settings).await?;
    db::migrate(&db).await?;
    db::health_check(&db).await?;
    Ok(db)
}

#[async_trait]
impl MonitorStore for DirectStore {
    async fn status(&self) -> ConnectionStatus {
        self.status.read().await.clone()
    }

    async fn reconnect(&self) -> ConnectionStatus {
        let status = if self.credentials_refused {
            error!("Refusing to connect: default database credentials are not allowed in production");
            *self.db.write().await = None;
            ConnectionStatus::disconnected(now_millis(), ILLEGAL_DEFAULT_CREDENTIALS)
        } else {
            let opened = match &self.source {
                Source::Pool(settings) => open(settings).await,
                Source::Injected(db) => db::health_check(db)
                    .await
                    .map(|()| db.clone())
                    .map_err(DatabaseError::from),
                Source::Misconfigured(reason) => Err(DatabaseError::InvalidConfiguration {
                    message: reason.clone(),
                }),
            };
            match opened {
                Ok(db) => {
                    info!(
                        strategy = %self.snapshots.strategy(),
                        "Monitor database connected"
                    );
                    *self.db.write().await = Some(db);
                    ConnectionStatus::connected(now_millis())
                }
                Err(err) => {
                    error!(error = %err, "Monitor database unavailable");
                    *self.db.write().await = None;
                    ConnectionStatus::disconnected(now_millis(), err.to_string())
                }
            }
        };

        *self.status.write().await = status.clone();
        status
    }

    fn snapshot_strategy(&self) -> Option<SnapshotStrategy> {
        Some(self.snapshots.strategy())
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let db = self.connection().await?;
        let result = upsert_transaction(&db, transaction).await;
        self.observe(result).await
    }

    async fn insert_step(&self, step: &Step) -> Result<(), StoreError> {
        let db = self.connection().await?;
        let result = upsert_step(&db, step).await;
        self.observe(result).await
    }

    async fn insert_logs(&self, logs: &[LogEntry]) -> Result<(), StoreError> {
        if logs.is_empty() {
            return Ok(());
        }
        let db = self.connection().await?;
        let rows = logs.iter().map(|entry| log_entry::ActiveModel {
            id: NotSet,
            transaction: Set(entry.transaction.clone()),
            level: Set(entry.level.clone()),
            node: Set(entry.node.clone()),
            text: Set(entry.text.clone()),
            created_at: Set(entry.created_at),
        });
        let result = LogEntryEntity::insert_many(rows)
            .exec_without_returning(&db)
            .await
            .map(|_| ())
            .map_err(StoreError::from);
        self.observe(result).await
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let db = self.connection().await?;
        let result = self.snapshots.write(&db, snapshot).await;
        self.observe(result).await
    }

    async fn query_transactions(
        &self,
        search: &TransactionSearch,
    ) -> Result<Vec<TransactionView>, StoreError> {
        let snapshot_search = self.snapshots.strategy() == SnapshotStrategy::Collection;
        let pipeline = Pipeline::for_search(search, snapshot_search)?;
        self.run(&pipeline).await
    }

    async fn query_transaction_by_id(
        &self,
        id: &str,
    ) -> Result<Option<TransactionView>, StoreError> {
        let views = self.run(&Pipeline::for_transaction(id)).await?;
        Ok(views.into_iter().next())
    }

    async fn query_snapshots_for_transaction(
        &self,
        transaction: &str,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let db = self.connection().await?;
        let result = self.snapshots.list(&db, transaction).await;
        self.observe(result).await
    }

    async fn get_snapshot_by_id(&self, id: &str) -> Result<Option<SnapshotContent>, StoreError> {
        let db = self.connection().await?;
        let result = self.snapshots.read(&db, id).await;
        self.observe(result).await
    }

    async fn find_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>, StoreError> {
        let db = self.connection().await?;
        let result = self.snapshots.find(&db, filter).await;
        self.observe(result).await
    }
}

/// Inserts or updates a transaction row. Receivers are unioned with the
/// stored set so a re-closed transaction never loses receivers.
async fn upsert_transaction(
    db: &DatabaseConnection,
    transaction: &Transaction,
) -> Result<(), StoreError> {
    let txn = db.begin().await?;
    let existing = TransactionEntity::find_by_id(transaction.id.clone())
        .one(&txn)
        .await?;

    let mut merged = transaction.clone();
    match existing {
        Some(row) => {
            let stored: Vec<String> = serde_json::from_value(row.receivers.clone())?;
            merged.merge_receivers(&stored);

            let mut active: transaction::ActiveModel = row.into();
            active.start = Set(merged.start);
            active.end = Set(merged.end);
            active.sender = Set(merged.sender.clone());
            active.receivers = Set(serde_json::to_value(&merged.receivers)?);
            active.update(&txn).await?;
        }
        None => {
            let active = transaction::ActiveModel {
                id: Set(merged.id.clone()),
                start: Set(merged.start),
                end: Set(merged.end),
                sender: Set(merged.sender.clone()),
                receivers: Set(serde_json::to_value(&merged.receivers)?),
            };
            TransactionEntity::insert(active)
                .exec_without_returning(&txn)
                .await?;
        }
    }

    txn.commit().await?;
    debug!(
        transaction_id = %merged.id,
        receivers = merged.receivers.len(),
        "Transaction stored"
    );
    Ok(())
}

async fn upsert_step(db: &DatabaseConnection, step: &Step) -> Result<(), StoreError> {
    let row = step::ActiveModel {
        transaction: Set(step.transaction.clone()),
        id: Set(step.id.clone()),
        topic: Set(step.topic.clone()),
        node_id: Set(step.node.id.clone()),
        node_type: Set(step.node.node_type.clone()),
        node_name: Set(step.node.name.clone()),
        created_at: Set(step.created_at),
        snapshot_id: Set(step.snapshot_id.clone()),
    };

    StepEntity::insert(row)
        .on_conflict(
            OnConflict::columns([step::Column::Id, step::Column::Transaction])
                .update_columns([
                    step::Column::Topic,
                    step::Column::NodeId,
                    step::Column::NodeType,
                    step::Column::NodeName,
                    step::Column::CreatedAt,
                    step::Column::SnapshotId,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Runs a validated plan. Id and day filters become SQL predicates; any
/// other filter is evaluated per joined view while scanning in start order.
async fn execute(
    db: &DatabaseConnection,
    snapshots: &dyn SnapshotStore,
    plan: &Plan<'_>,
) -> Result<Vec<TransactionView>, StoreError> {
    let mut query = TransactionEntity::find();
    let mut residual = None;
    match plan.filter {
        Some(Filter::IdEquals(id)) => {
            query = query.filter(transaction::Column::Id.eq(id.as_str()));
        }
        Some(Filter::StartWithin { from, until }) => {
            query = query
                .filter(transaction::Column::Start.gte(*from))
                .filter(transaction::Column::Start.lt(*until));
        }
        Some(other) => residual = Some(other),
        None => {}
    }
    query = query
        .order_by_desc(transaction::Column::Start)
        .order_by_desc(transaction::Column::Id);

    let Some(filter) = residual else {
        query = query.offset(plan.skip);
        if let Some(limit) = plan.limit {
            query = query.limit(limit);
        }
        let rows = query.all(db).await?;
        return join(db, snapshots, plan, rows).await;
    };

    let limit = plan.limit.unwrap_or(u64::MAX);
    let mut matched = Vec::new();
    if limit == 0 {
        return Ok(matched);
    }

    let mut skipped = 0;
    let mut scanned = 0usize;
    let mut pages = query.paginate(db, SCAN_BATCH);
    while let Some(rows) = pages.fetch_and_next().await? {
        scanned += rows.len();
        for view in join(db, snapshots, plan, rows).await? {
            if !filter.matches(&view) {
                continue;
            }
            if skipped < plan.skip {
                skipped += 1;
                continue;
            }
            matched.push(view);
            if matched.len() as u64 >= limit {
                debug!(scanned, "Transaction search satisfied");
                return Ok(matched);
            }
        }
    }

    debug!(scanned, matched = matched.len(), "Transaction search exhausted");
    Ok(matched)
}

/// Attaches the looked-up collections to each transaction row, keeping the
/// row order.
async fn join(
    db: &DatabaseConnection,
    snapshots: &dyn SnapshotStore,
    plan: &Plan<'_>,
    rows: Vec<transaction::Model>,
) -> Result<Vec<TransactionView>, StoreError> {
    let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();

    let mut steps: HashMap<String, Vec<Step>> = HashMap::new();
    if plan.joins(Collection::Steps) && !ids.is_empty() {
        let found = StepEntity::find()
            .filter(step::Column::Transaction.is_in(ids.iter().cloned()))
            .order_by_asc(step::Column::CreatedAt)
            .all(db)
            .await?;
        for row in found {
            steps
                .entry(row.transaction.clone())
                .or_default()
                .push(row.into());
        }
    }

    let mut logs: HashMap<String, Vec<LogEntry>> = HashMap::new();
    if plan.joins(Collection::Logs) && !ids.is_empty() {
        let found = LogEntryEntity::find()
            .filter(log_entry::Column::Transaction.is_in(ids.iter().cloned()))
            .order_by_asc(log_entry::Column::CreatedAt)
            .order_by_asc(log_entry::Column::Id)
            .all(db)
            .await?;
        for row in found {
            logs.entry(row.transaction.clone())
                .or_default()
                .push(row.into());
        }
    }

    let mut snaps: HashMap<String, Vec<Snapshot>> = HashMap::new();
    let with_snapshots = plan.joins(Collection::Snapshots);
    if with_snapshots {
        for snapshot in snapshots.lookup(db, &ids).await? {
            snaps
                .entry(snapshot.transaction.clone())
                .or_default()
                .push(snapshot);
        }
    }

    rows.into_iter()
        .map(|row| {
            let transaction = Transaction::try_from(row)?;
            let id = transaction.id.clone();
            let mut view = TransactionView::new(transaction);
            view.steps = steps.remove(&id).unwrap_or_default();
            view.logs = logs.remove(&id).unwrap_or_default();
            if with_snapshots {
                view.snapshots = Some(snaps.remove(&id).unwrap_or_default());
            }
            Ok(view)
        })
        .collect()
}

impl TryFrom<transaction::Model> for Transaction {
    type Error = StoreError;

    fn try_from(model: transaction::Model) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: model.id,
            start: model.start,
            end: model.end,
            sender: model.sender,
            receivers: serde_json::from_value(model.receivers)?,
        })
    }
}

impl From<step::Model> for Step {
    fn from(model: step::Model) -> Self {
        Step {
            id: model.id,
            topic: model.topic,
            node: NodeDescriptor {
                id: model.node_id,
                node_type: model.node_type,
                name: model.node_name,
            },
            transaction: model.transaction,
            created_at: model.created_at,
            snapshot_id: model.snapshot_id,
        }
    }
}

impl From<log_entry::Model> for LogEntry {
    fn from(model: log_entry::Model) -> Self {
        LogEntry {
            level: model.level,
            node: model.node,
            text: model.text,
            transaction: model.transaction,
            created_at: model.created_at,
        }
    }
}
