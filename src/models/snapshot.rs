//! Snapshot entity model
//!
//! Used by the collection snapshot strategy: each snapshot is an upserted
//! row whose `msg` column holds the message copy.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "snapshots")]
pub struct Model {
    /// Hop key `<message id>-<source node>-<port>`
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub transaction: String,

    pub node_id: String,

    pub node_type: String,

    pub node_name: String,

    pub created_at: i64,

    #[sea_orm(column_type = "JsonBinary")]
    pub msg: JsonValue,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
