//! Snapshot bucket file entity
//!
//! Metadata row of a blob stored in `snapshots-bucket`. The blob body lives
//! in [`super::snapshot_chunk`] rows.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "snapshots-bucket.files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Snapshot id the blob was written for
    pub filename: String,

    pub transaction: String,

    pub content_type: String,

    /// Total blob length in bytes
    pub length: i64,

    pub chunk_size: i32,

    pub chunk_count: i32,

    pub uploaded_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::snapshot_chunk::Entity")]
    Chunks,
}

impl Related<super::snapshot_chunk::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chunks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
