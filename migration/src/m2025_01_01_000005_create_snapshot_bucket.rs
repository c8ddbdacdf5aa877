//! Migration to create the `snapshots-bucket` blob store.
//!
//! Laid out like a GridFS bucket: a files table holding one row per stored
//! blob (named by snapshot id) and a chunks table holding the ordered byte
//! chunks of each file.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BucketFiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BucketFiles::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BucketFiles::Filename).string().not_null())
                    .col(ColumnDef::new(BucketFiles::Transaction).string().not_null())
                    .col(ColumnDef::new(BucketFiles::ContentType).string().not_null())
                    .col(ColumnDef::new(BucketFiles::Length).big_integer().not_null())
                    .col(ColumnDef::new(BucketFiles::ChunkSize).integer().not_null())
                    .col(ColumnDef::new(BucketFiles::ChunkCount).integer().not_null())
                    .col(ColumnDef::new(BucketFiles::UploadedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BucketChunks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(BucketChunks::FileId).string().not_null())
                    .col(ColumnDef::new(BucketChunks::N).integer().not_null())
                    .col(ColumnDef::new(BucketChunks::Data).binary().not_null())
                    .primary_key(
                        Index::create()
                            .col(BucketChunks::FileId)
                            .col(BucketChunks::N),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_snapshot_chunks_file_id")
                            .from(BucketChunks::Table, BucketChunks::FileId)
                            .to(BucketFiles::Table, BucketFiles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_snapshot_files_filename")
                    .table(BucketFiles::Table)
                    .col(BucketFiles::Filename)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_snapshot_files_transaction")
                    .table(BucketFiles::Table)
                    .col(BucketFiles::Transaction)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BucketChunks::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(BucketFiles::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BucketFiles {
    #[sea_orm(iden = "snapshots-bucket.files")]
    Table,
    Id,
    Filename,
    Transaction,
    ContentType,
    Length,
    ChunkSize,
    ChunkCount,
    UploadedAt,
}

#[derive(DeriveIden)]
enum BucketChunks {
    #[sea_orm(iden = "snapshots-bucket.chunks")]
    Table,
    FileId,
    N,
    Data,
}
