//! Migration to create the audit tables: dry-run records and job logs.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncDryRuns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncDryRuns::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncDryRuns::OpmsItemId).big_integer().null())
                    .col(ColumnDef::new(SyncDryRuns::OpmsItemCode).text().null())
                    .col(ColumnDef::new(SyncDryRuns::OpmsProductId).big_integer().null())
                    .col(ColumnDef::new(SyncDryRuns::SyncType).text().not_null())
                    .col(
                        ColumnDef::new(SyncDryRuns::ActualJsonPayload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncDryRuns::PayloadSizeBytes)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncDryRuns::FieldCount).integer().not_null())
                    .col(ColumnDef::new(SyncDryRuns::ValidationStatus).text().not_null())
                    .col(ColumnDef::new(SyncDryRuns::WouldSucceed).boolean().not_null())
                    .col(
                        ColumnDef::new(SyncDryRuns::SimulatedErrors)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncDryRuns::SimulatedResponse)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncDryRuns::CreatedAt)
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
                    .name("idx_sync_dry_runs_item")
                    .table(SyncDryRuns::Table)
                    .col(SyncDryRuns::OpmsItemId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_dry_runs_type_created")
                    .table(SyncDryRuns::Table)
                    .col(SyncDryRuns::SyncType)
                    .col(SyncDryRuns::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SyncJobLogs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobLogs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncJobLogs::SyncJobId).uuid().not_null())
                    .col(ColumnDef::new(SyncJobLogs::SyncItemId).uuid().null())
                    .col(ColumnDef::new(SyncJobLogs::Level).text().not_null())
                    .col(ColumnDef::new(SyncJobLogs::Message).text().not_null())
                    .col(ColumnDef::new(SyncJobLogs::Context).json_binary().null())
                    .col(
                        ColumnDef::new(SyncJobLogs::CreatedAt)
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
                    .name("idx_sync_job_logs_job_created")
                    .table(SyncJobLogs::Table)
                    .col(SyncJobLogs::SyncJobId)
                    .col(SyncJobLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncJobLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncDryRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncDryRuns {
    Table,
    Id,
    OpmsItemId,
    OpmsItemCode,
    OpmsProductId,
    SyncType,
    ActualJsonPayload,
    PayloadSizeBytes,
    FieldCount,
    ValidationStatus,
    WouldSucceed,
    SimulatedErrors,
    SimulatedResponse,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SyncJobLogs {
    Table,
    Id,
    SyncJobId,
    SyncItemId,
    Level,
    Message,
    Context,
    CreatedAt,
}
