//! Transaction entity model
//!
//! One row per closed transaction. `receivers` holds a JSON array of unique
//! receiver names.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Message id the transaction was correlated from
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Epoch milliseconds of the first observed hop
    pub start: i64,

    /// Epoch milliseconds of the terminal hop
    pub end: Option<i64>,

    pub sender: String,

    #[sea_orm(column_type = "Json")]
    pub receivers: JsonValue,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
