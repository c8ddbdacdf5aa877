//! Snapshot bucket chunk entity

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "snapshots-bucket.chunks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub file_id: String,

    /// Zero-based chunk index within the file
    #[sea_orm(primary_key, auto_increment = false)]
    pub n: i32,

    pub data: Vec<u8>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::snapshot_file::Entity",
        from = "Column::FileId",
        to = "super::snapshot_file::Column::Id"
    )]
    File,
}

impl Related<super::snapshot_file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::File.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
