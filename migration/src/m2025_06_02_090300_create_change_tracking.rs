//! Migration to create change tracking tables.
//!
//! `opms_change_log` is append-only; `opms_item_sync_status` holds one row per
//! catalog item describing its current sync health.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OpmsChangeLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OpmsChangeLog::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OpmsChangeLog::ItemId).big_integer().not_null())
                    .col(ColumnDef::new(OpmsChangeLog::ProductId).big_integer().null())
                    .col(ColumnDef::new(OpmsChangeLog::ChangeType).text().not_null())
                    .col(ColumnDef::new(OpmsChangeLog::ChangeSource).text().not_null())
                    .col(ColumnDef::new(OpmsChangeLog::ChangeData).json_binary().null())
                    .col(
                        ColumnDef::new(OpmsChangeLog::DetectedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_opms_change_log_item_detected")
                    .table(OpmsChangeLog::Table)
                    .col(OpmsChangeLog::ItemId)
                    .col(OpmsChangeLog::DetectedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OpmsItemSyncStatus::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OpmsItemSyncStatus::ItemId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OpmsItemSyncStatus::SyncStatus)
                            .text()
                            .not_null()
                            .default("NEVER_SYNCED"),
                    )
                    .col(
                        ColumnDef::new(OpmsItemSyncStatus::SyncAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OpmsItemSyncStatus::LastSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(OpmsItemSyncStatus::LastError).text().null())
                    .col(ColumnDef::new(OpmsItemSyncStatus::NetsuiteItemId).text().null())
                    .col(
                        ColumnDef::new(OpmsItemSyncStatus::FieldValidationResults)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OpmsItemSyncStatus::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OpmsItemSyncStatus::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OpmsChangeLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OpmsChangeLog {
    Table,
    Id,
    ItemId,
    ProductId,
    ChangeType,
    ChangeSource,
    ChangeData,
    DetectedAt,
}

#[derive(DeriveIden)]
enum OpmsItemSyncStatus {
    Table,
    ItemId,
    SyncStatus,
    SyncAttempts,
    LastSyncAt,
    LastError,
    NetsuiteItemId,
    FieldValidationResults,
    UpdatedAt,
}
