//! Migration to create the transactions table.
//!
//! One row per closed transaction. Times are epoch milliseconds and the
//! receiver set is stored as a JSON array.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Transactions::Start).big_integer().not_null())
                    .col(ColumnDef::new(Transactions::End).big_integer().null())
                    .col(
                        ColumnDef::new(Transactions::Sender)
                            .string()
                            .not_null()
                            .default("Unknown"),
                    )
                    .col(ColumnDef::new(Transactions::Receivers).json().not_null())
                    .to_owned(),
            )
            .await?;

        // Search results are always ordered newest first
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_transactions_start ON transactions (start DESC)"
                    .to_string(),
            ))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_transactions_start").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Transactions {
    Table,
    Id,
    Start,
    End,
    Sender,
    Receivers,
}
