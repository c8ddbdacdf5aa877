//! Migration to create the snapshots table used by the collection snapshot strategy.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Snapshots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Snapshots::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Snapshots::Transaction).string().not_null())
                    .col(ColumnDef::new(Snapshots::NodeId).string().not_null())
                    .col(ColumnDef::new(Snapshots::NodeType).string().not_null())
                    .col(ColumnDef::new(Snapshots::NodeName).text().not_null())
                    .col(ColumnDef::new(Snapshots::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Snapshots::Msg).json_binary().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_snapshots_transaction")
                    .table(Snapshots::Table)
                    .col(Snapshots::Transaction)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_snapshots_transaction").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Snapshots::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Snapshots {
    Table,
    Id,
    Transaction,
    NodeId,
    NodeType,
    NodeName,
    CreatedAt,
    Msg,
}
