//! Migration to create the sync_jobs and sync_items tables.
//!
//! A sync job is one unit-of-work batch; sync items are the per-record attempts
//! it owns, including before/after pricing snapshots for audit.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncJobs::JobType).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(SyncJobs::TotalItems).integer().null())
                    .col(
                        ColumnDef::new(SyncJobs::ProcessedItems)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::SuccessfulItems)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::FailedItems)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::SkippedItems)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncJobs::TriggeredBy).text().null())
                    .col(ColumnDef::new(SyncJobs::Source).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncJobs::DurationSeconds).double().null())
                    .col(ColumnDef::new(SyncJobs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::UpdatedAt)
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
                    .name("idx_sync_jobs_status_created")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::Status)
                    .col(SyncJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SyncItems::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncItems::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncItems::SyncJobId).uuid().not_null())
                    .col(ColumnDef::new(SyncItems::NetsuiteItemId).text().null())
                    .col(ColumnDef::new(SyncItems::NetsuiteInternalId).text().null())
                    .col(ColumnDef::new(SyncItems::OpmsItemId).big_integer().null())
                    .col(ColumnDef::new(SyncItems::OpmsProductId).big_integer().null())
                    .col(ColumnDef::new(SyncItems::ItemCode).text().null())
                    .col(
                        ColumnDef::new(SyncItems::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(SyncItems::SyncFields).json_binary().null())
                    .col(ColumnDef::new(SyncItems::PricingData).json_binary().null())
                    .col(ColumnDef::new(SyncItems::PricingBefore).json_binary().null())
                    .col(ColumnDef::new(SyncItems::PricingAfter).json_binary().null())
                    .col(ColumnDef::new(SyncItems::ErrorMessage).text().null())
                    .col(ColumnDef::new(SyncItems::SkipReason).text().null())
                    .col(
                        ColumnDef::new(SyncItems::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncItems::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(SyncItems::ProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncItems::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_items_sync_job_id")
                            .from(SyncItems::Table, SyncItems::SyncJobId)
                            .to(SyncJobs::Table, SyncJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_items_job")
                    .table(SyncItems::Table)
                    .col(SyncItems::SyncJobId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_items_item_code")
                    .table(SyncItems::Table)
                    .col(SyncItems::ItemCode)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    JobType,
    Status,
    TotalItems,
    ProcessedItems,
    SuccessfulItems,
    FailedItems,
    SkippedItems,
    TriggeredBy,
    Source,
    StartedAt,
    CompletedAt,
    DurationSeconds,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncItems {
    Table,
    Id,
    SyncJobId,
    NetsuiteItemId,
    NetsuiteInternalId,
    OpmsItemId,
    OpmsProductId,
    ItemCode,
    Status,
    SyncFields,
    PricingData,
    PricingBefore,
    PricingAfter,
    ErrorMessage,
    SkipReason,
    RetryCount,
    MaxRetries,
    ProcessedAt,
    CreatedAt,
    UpdatedAt,
}
