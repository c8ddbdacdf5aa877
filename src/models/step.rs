//! Step entity model
//!
//! A step is one hop of a transaction, keyed by `(transaction, id)` where
//! `id` is `<source node>-<port>`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub transaction: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub topic: String,

    pub node_id: String,

    pub node_type: String,

    pub node_name: String,

    pub created_at: i64,

    /// Hop key of the snapshot taken at this step, if one was recorded
    pub snapshot_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
