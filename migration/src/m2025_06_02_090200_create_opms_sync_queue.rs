//! Migration to create the opms_sync_queue table.
//!
//! The queue is drained by concurrent workers using `FOR UPDATE SKIP LOCKED`,
//! so the claim index leads with status and retry eligibility.

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
                    .table(OpmsSyncQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OpmsSyncQueue::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OpmsSyncQueue::ItemId).big_integer().not_null())
                    .col(ColumnDef::new(OpmsSyncQueue::ProductId).big_integer().null())
                    .col(ColumnDef::new(OpmsSyncQueue::EventType).text().not_null())
                    .col(ColumnDef::new(OpmsSyncQueue::EventData).json_binary().not_null())
                    .col(
                        ColumnDef::new(OpmsSyncQueue::Priority)
                            .small_integer()
                            .not_null()
                            .default(20),
                    )
                    .col(
                        ColumnDef::new(OpmsSyncQueue::Status)
                            .text()
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(
                        ColumnDef::new(OpmsSyncQueue::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OpmsSyncQueue::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(OpmsSyncQueue::RetryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(OpmsSyncQueue::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(OpmsSyncQueue::ProcessingResults)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(OpmsSyncQueue::ClaimedBy).text().null())
                    .col(
                        ColumnDef::new(OpmsSyncQueue::ClaimedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OpmsSyncQueue::ProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OpmsSyncQueue::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OpmsSyncQueue::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_opms_sync_queue_claim ON opms_sync_queue (status, retry_at, priority DESC, created_at)".to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_opms_sync_queue_item_status")
                    .table(OpmsSyncQueue::Table)
                    .col(OpmsSyncQueue::ItemId)
                    .col(OpmsSyncQueue::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_opms_sync_queue_claim").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_opms_sync_queue_item_status")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(OpmsSyncQueue::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OpmsSyncQueue {
    Table,
    Id,
    ItemId,
    ProductId,
    EventType,
    EventData,
    Priority,
    Status,
    RetryCount,
    MaxRetries,
    RetryAt,
    ErrorMessage,
    ProcessingResults,
    ClaimedBy,
    ClaimedAt,
    ProcessedAt,
    CreatedAt,
    UpdatedAt,
}
