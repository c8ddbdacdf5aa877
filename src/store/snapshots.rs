//! Snapshot storage strategies of the direct store.
//!
//! `collection` keeps each snapshot as an upserted row. `bucket` writes the
//! snapshot as a JSON blob split into fixed-size chunks, GridFS style, so
//! large messages never hit row size limits; reads stream the chunks back.

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

use super::{SnapshotContent, SnapshotFilter, StoreError};
use crate::config::SnapshotStrategy;
use crate::models::{SnapshotChunk, SnapshotEntity, SnapshotFile, snapshot, snapshot_chunk, snapshot_file};
use crate::monitor::records::{NodeDescriptor, Snapshot};

/// Bucket chunk size in bytes.
pub const CHUNK_SIZE: usize = 255 * 1024;
pub const BLOB_CONTENT_TYPE: &str = "application/json";

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    fn strategy(&self) -> SnapshotStrategy;

    async fn write(&self, db: &DatabaseConnection, snapshot: &Snapshot) -> Result<(), StoreError>;

    async fn read(
        &self,
        db: &DatabaseConnection,
        id: &str,
    ) -> Result<Option<SnapshotContent>, StoreError>;

    /// Snapshots of one transaction, newest first.
    async fn list(&self, db: &DatabaseConnection, transaction: &str)
    -> Result<Vec<Snapshot>, StoreError>;

    /// Snapshots of several transactions, newest first.
    async fn lookup(
        &self,
        db: &DatabaseConnection,
        transactions: &[String],
    ) -> Result<Vec<Snapshot>, StoreError>;

    async fn find(
        &self,
        db: &DatabaseConnection,
        filter: &SnapshotFilter,
    ) -> Result<Vec<Snapshot>, StoreError>;
}

pub fn snapshot_store_for(strategy: SnapshotStrategy) -> Box<dyn SnapshotStore> {
    match strategy {
        SnapshotStrategy::Collection => Box::new(CollectionSnapshots),
        SnapshotStrategy::Bucket => Box::new(BucketSnapshots),
    }
}

pub struct CollectionSnapshots;

impl From<snapshot::Model> for Snapshot {
    fn from(model: snapshot::Model) -> Self {
        Snapshot {
            id: model.id,
            transaction: model.transaction,
            node: NodeDescriptor {
                id: model.node_id,
                node_type: model.node_type,
                name: model.node_name,
            },
            created_at: model.created_at,
            msg: model.msg,
        }
    }
}

#[async_trait]
impl SnapshotStore for CollectionSnapshots {
    fn strategy(&self) -> SnapshotStrategy {
        SnapshotStrategy::Collection
    }

    async fn write(&self, db: &DatabaseConnection, snapshot: &Snapshot) -> Result<(), StoreError> {
        let row = snapshot::ActiveModel {
            id: Set(snapshot.id.clone()),
            transaction: Set(snapshot.transaction.clone()),
            node_id: Set(snapshot.node.id.clone()),
            node_type: Set(snapshot.node.node_type.clone()),
            node_name: Set(snapshot.node.name.clone()),
            created_at: Set(snapshot.created_at),
            msg: Set(snapshot.msg.clone()),
        };

        SnapshotEntity::insert(row)
            .on_conflict(
                OnConflict::column(snapshot::Column::Id)
                    .update_columns([
                        snapshot::Column::Transaction,
                        snapshot::Column::NodeId,
                        snapshot::Column::NodeType,
                        snapshot::Column::NodeName,
                        snapshot::Column::CreatedAt,
                        snapshot::Column::Msg,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        Ok(())
    }

    async fn read(
        &self,
        db: &DatabaseConnection,
        id: &str,
    ) -> Result<Option<SnapshotContent>, StoreError> {
        let found = SnapshotEntity::find_by_id(id.to_string()).one(db).await?;
        Ok(found.map(|model| SnapshotContent::Document(model.into())))
    }

    async fn list(
        &self,
        db: &DatabaseConnection,
        transaction: &str,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let rows = SnapshotEntity::find()
            .filter(snapshot::Column::Transaction.eq(transaction))
            .order_by_desc(snapshot::Column::CreatedAt)
            .all(db)
            .await?;
        Ok(rows.into_iter().map(Snapshot::from).collect())
    }

    async fn lookup(
        &self,
        db: &DatabaseConnection,
        transactions: &[String],
    ) -> Result<Vec<Snapshot>, StoreError> {
        if transactions.is_empty() {
            return Ok(Vec::new());
        }
        let rows = SnapshotEntity::find()
            .filter(snapshot::Column::Transaction.is_in(transactions.iter().cloned()))
            .order_by_desc(snapshot::Column::CreatedAt)
            .all(db)
            .await?;
        Ok(rows.into_iter().map(Snapshot::from).collect())
    }

    async fn find(
        &self,
        db: &DatabaseConnection,
        filter: &SnapshotFilter,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let mut query = SnapshotEntity::find();
        if let Some(id) = &filter.id {
            query = query.filter(snapshot::Column::Id.eq(id.as_str()));
        }
        if let Some(transaction) = &filter.transaction {
            query = query.filter(snapshot::Column::Transaction.eq(transaction.as_str()));
        }
        if let Some(node_type) = &filter.node_type {
            query = query.filter(snapshot::Column::NodeType.eq(node_type.as_str()));
        }
        let rows = query
            .order_by_desc(snapshot::Column::CreatedAt)
            .all(db)
            .await?;
        Ok(rows.into_iter().map(Snapshot::from).collect())
    }
}

pub struct BucketSnapshots;

impl BucketSnapshots {
    /// Reassembles and decodes every blob in `files`. When a snapshot was
    /// uploaded more than once only the newest upload is kept.
    async fn decode_files(
        db: &DatabaseConnection,
        mut files: Vec<snapshot_file::Model>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));

        let mut seen = std::collections::HashSet::new();
        let mut snapshots = Vec::with_capacity(files.len());
        for file in files {
            if !seen.insert(file.filename.clone()) {
                continue;
            }
            let blob = load_blob(db, &file).await?;
            snapshots.push(serde_json::from_slice::<Snapshot>(&blob)?);
        }

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }
}

async fn load_blob(db: &DatabaseConnection, file: &snapshot_file::Model) -> Result<Vec<u8>, StoreError> {
    let chunks = SnapshotChunk::find()
        .filter(snapshot_chunk::Column::FileId.eq(file.id.as_str()))
        .order_by_asc(snapshot_chunk::Column::N)
        .all(db)
        .await?;

    let mut blob = Vec::with_capacity(usize::try_from(file.length).unwrap_or_default());
    for (expected, chunk) in (0..file.chunk_count).zip(chunks.iter()) {
        if chunk.n != expected {
            return Err(StoreError::MissingChunk {
                file_id: file.id.clone(),
                n: expected,
            });
        }
        blob.extend_from_slice(&chunk.data);
    }
    if chunks.len() < file.chunk_count as usize {
        return Err(StoreError::MissingChunk {
            file_id: file.id.clone(),
            n: chunks.len() as i32,
        });
    }
    Ok(blob)
}

async fn next_chunk(
    db: DatabaseConnection,
    file_id: String,
    chunk_count: i32,
    n: i32,
) -> Result<Option<(Bytes, i32)>, StoreError> {
    if n >= chunk_count {
        return Ok(None);
    }
    let chunk = SnapshotChunk::find_by_id((file_id.clone(), n))
        .one(&db)
        .await?
        .ok_or(StoreError::MissingChunk { file_id, n })?;
    Ok(Some((Bytes::from(chunk.data), n + 1)))
}

#[async_trait]
impl SnapshotStore for BucketSnapshots {
    fn strategy(&self) -> SnapshotStrategy {
        SnapshotStrategy::Bucket
    }

    async fn write(&self, db: &DatabaseConnection, snapshot: &Snapshot) -> Result<(), StoreError> {
        let blob = serde_json::to_vec(snapshot)?;
        let file_id = Uuid::new_v4().to_string();
        let pieces: Vec<&[u8]> = blob.chunks(CHUNK_SIZE).collect();

        let file = snapshot_file::ActiveModel {
            id: Set(file_id.clone()),
            filename: Set(snapshot.id.clone()),
            transaction: Set(snapshot.transaction.clone()),
            content_type: Set(BLOB_CONTENT_TYPE.to_string()),
            length: Set(blob.len() as i64),
            chunk_size: Set(CHUNK_SIZE as i32),
            chunk_count: Set(pieces.len() as i32),
            uploaded_at: Set(Utc::now().timestamp_millis()),
        };
        let chunks = pieces.iter().enumerate().map(|(n, data)| snapshot_chunk::ActiveModel {
            file_id: Set(file_id.clone()),
            n: Set(n as i32),
            data: Set(data.to_vec()),
        });

        let txn = db.begin().await?;
        SnapshotFile::insert(file).exec_without_returning(&txn).await?;
        SnapshotChunk::insert_many(chunks)
            .exec_without_returning(&txn)
            .await?;
        txn.commit().await?;

        debug!(
            snapshot_id = %snapshot.id,
            bytes = blob.len(),
            chunks = pieces.len(),
            "Snapshot blob uploaded"
        );
        Ok(())
    }

    async fn read(
        &self,
        db: &DatabaseConnection,
        id: &str,
    ) -> Result<Option<SnapshotContent>, StoreError> {
        let Some(file) = SnapshotFile::find()
            .filter(snapshot_file::Column::Filename.eq(id))
            .order_by_desc(snapshot_file::Column::UploadedAt)
            .one(db)
            .await?
        else {
            return Ok(None);
        };

        let db = db.clone();
        let file_id = file.id;
        let chunk_count = file.chunk_count;
        let chunks = stream::try_unfold(0, move |n| {
            next_chunk(db.clone(), file_id.clone(), chunk_count, n)
        });
        Ok(Some(SnapshotContent::Blob(chunks.boxed())))
    }

    async fn list(
        &self,
        db: &DatabaseConnection,
        transaction: &str,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let files = SnapshotFile::find()
            .filter(snapshot_file::Column::Transaction.eq(transaction))
            .all(db)
            .await?;
        Self::decode_files(db, files).await
    }

    async fn lookup(
        &self,
        db: &DatabaseConnection,
        transactions: &[String],
    ) -> Result<Vec<Snapshot>, StoreError> {
        if transactions.is_empty() {
            return Ok(Vec::new());
        }
        let files = SnapshotFile::find()
            .filter(snapshot_file::Column::Transaction.is_in(transactions.iter().cloned()))
            .all(db)
            .await?;
        Self::decode_files(db, files).await
    }

    async fn find(
        &self,
        db: &DatabaseConnection,
        filter: &SnapshotFilter,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let mut query = SnapshotFile::find();
        if let Some(id) = &filter.id {
            query = query.filter(snapshot_file::Column::Filename.eq(id.as_str()));
        }
        if let Some(transaction) = &filter.transaction {
            query = query.filter(snapshot_file::Column::Transaction.eq(transaction.as_str()));
        }
        let files = query.all(db).await?;
        let mut snapshots = Self::decode_files(db, files).await?;
        snapshots.retain(|snapshot| filter.matches(snapshot));
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use sea_orm::Database;
    use serde_json::json;

    async fn setup_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&db).await.unwrap();
        db
    }

    fn snapshot(id: &str, tx: &str, created_at: i64, payload: serde_json::Value) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            transaction: tx.to_string(),
            node: NodeDescriptor {
                id: "node-a".to_string(),
                node_type: "function".to_string(),
                name: "enrich".to_string(),
            },
            created_at,
            msg: json!({ "_msgid": tx, "payload": payload }),
        }
    }

    #[tokio::test]
    async fn collection_snapshots_upsert_by_id() {
        let db = setup_db().await;
        let store = CollectionSnapshots;

        store.write(&db, &snapshot("m1-a-0", "m1", 1, json!(1))).await.unwrap();
        store.write(&db, &snapshot("m1-a-0", "m1", 2, json!(2))).await.unwrap();
        store.write(&db, &snapshot("m1-b-0", "m1", 3, json!(3))).await.unwrap();

        let listed = store.list(&db, "m1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "m1-b-0");
        assert_eq!(listed[1].msg["payload"], json!(2));

        match store.read(&db, "m1-a-0").await.unwrap() {
            Some(SnapshotContent::Document(found)) => assert_eq!(found.created_at, 2),
            other => panic!("unexpected read result: {:?}", other),
        }
        assert!(store.read(&db, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bucket_blobs_span_multiple_chunks_and_stream_back() {
        let db = setup_db().await;
        let store = BucketSnapshots;
        let big = "x".repeat(CHUNK_SIZE * 2 + 17);
        let original = snapshot("m1-a-0", "m1", 5, json!(big));

        store.write(&db, &original).await.unwrap();

        let file = SnapshotFile::find().one(&db).await.unwrap().unwrap();
        assert_eq!(file.chunk_count, 3);
        assert_eq!(file.content_type, BLOB_CONTENT_TYPE);

        let Some(SnapshotContent::Blob(stream)) = store.read(&db, "m1-a-0").await.unwrap() else {
            panic!("expected a blob");
        };
        let parts: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(parts.len(), 3);
        let bytes: Vec<u8> = parts.concat();
        let decoded: Snapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, original);

        let listed = store.list(&db, "m1").await.unwrap();
        assert_eq!(listed, vec![original]);
    }

    #[tokio::test]
    async fn bucket_find_applies_node_type_after_decoding() {
        let db = setup_db().await;
        let store = BucketSnapshots;
        store.write(&db, &snapshot("m1-a-0", "m1", 1, json!("a"))).await.unwrap();
        store.write(&db, &snapshot("m2-a-0", "m2", 2, json!("b"))).await.unwrap();

        let by_tx = store
            .find(&db, &SnapshotFilter {
                transaction: Some("m2".to_string()),
                ..SnapshotFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_tx.len(), 1);

        let by_type = store
            .find(&db, &SnapshotFilter {
                node_type: Some("inject".to_string()),
                ..SnapshotFilter::default()
            })
            .await
            .unwrap();
        assert!(by_type.is_empty());
    }
}
