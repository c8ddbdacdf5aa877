//! Migration to create the steps table.
//!
//! A step is identified by the source node and port within a transaction,
//! so the primary key is `(transaction, id)`. Lookups by step id alone are
//! served by a dedicated index.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Steps::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Steps::Transaction).string().not_null())
                    .col(ColumnDef::new(Steps::Id).string().not_null())
                    .col(ColumnDef::new(Steps::Topic).text().not_null())
                    .col(ColumnDef::new(Steps::NodeId).string().not_null())
                    .col(ColumnDef::new(Steps::NodeType).string().not_null())
                    .col(ColumnDef::new(Steps::NodeName).text().not_null())
                    .col(ColumnDef::new(Steps::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Steps::SnapshotId).string().null())
                    .primary_key(Index::create().col(Steps::Transaction).col(Steps::Id))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_steps_id")
                    .table(Steps::Table)
                    .col(Steps::Id)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_steps_transaction_created")
                    .table(Steps::Table)
                    .col(Steps::Transaction)
                    .col(Steps::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_steps_transaction_created").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_steps_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Steps::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Steps {
    Table,
    Id,
    Transaction,
    Topic,
    NodeId,
    NodeType,
    NodeName,
    CreatedAt,
    SnapshotId,
}
