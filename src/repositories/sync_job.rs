//! # SyncJob Repository
//!
//! Persistence for sync jobs and the sync items they own: creation, per-item
//! finalization with before/after snapshots, counter updates and retention.

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{RepositoryError, job_log, parse_column, to_json};
use crate::models::{
    sync_item::{self, Entity as SyncItemEntity},
    sync_job::{self, Entity as SyncJobEntity},
    types::{ItemStatus, JobStatus, JobType, PricingSnapshot, SyncFields},
};

/// Parameters for opening a new job.
#[derive(Debug, Clone)]
pub struct NewSyncJob {
    pub job_type: JobType,
    pub total_items: Option<i32>,
    pub triggered_by: Option<String>,
    pub source: Option<String>,
}

/// Identity of the catalog record a sync item is about.
#[derive(Debug, Clone, Default)]
pub struct NewSyncItem {
    pub netsuite_item_id: Option<String>,
    pub netsuite_internal_id: Option<String>,
    pub opms_item_id: Option<i64>,
    pub opms_product_id: Option<i64>,
    pub item_code: Option<String>,
    pub pricing_data: Option<JsonValue>,
    pub retry_count: i32,
    pub max_retries: i32,
}

/// Final state written to a sync item together with its audit fields.
#[derive(Debug, Clone)]
pub struct ItemCompletion {
    pub status: ItemStatus,
    pub sync_fields: Option<SyncFields>,
    pub pricing_before: Option<PricingSnapshot>,
    pub pricing_after: Option<PricingSnapshot>,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub netsuite_internal_id: Option<String>,
    /// Catalog ids resolved during the attempt, when not known up front
    pub opms_item_id: Option<i64>,
    pub opms_product_id: Option<i64>,
}

impl ItemCompletion {
    pub fn success() -> Self {
        Self {
            status: ItemStatus::Success,
            sync_fields: None,
            pricing_before: None,
            pricing_after: None,
            error_message: None,
            skip_reason: None,
            netsuite_internal_id: None,
            opms_item_id: None,
            opms_product_id: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: ItemStatus::Skipped,
            skip_reason: Some(reason.into()),
            ..Self::success()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ItemStatus::Failed,
            error_message: Some(message.into()),
            ..Self::success()
        }
    }
}

/// Filters for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: u64,
    pub offset: u64,
}

/// Rows removed by a retention purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobPurgeStats {
    pub jobs: u64,
    pub items: u64,
    pub logs: u64,
}

/// Repository for sync job database operations
#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    /// Create a new SyncJobRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Open a job in `running` state.
    pub async fn create_job(&self, new_job: NewSyncJob) -> Result<sync_job::Model, RepositoryError> {
        let now = Utc::now().fixed_offset();

        let job = sync_job::ActiveModel {
            id: Set(Uuid::new_v4()),
            job_type: Set(new_job.job_type.as_str().to_string()),
            status: Set(JobStatus::Running.as_str().to_string()),
            total_items: Set(new_job.total_items),
            processed_items: Set(0),
            successful_items: Set(0),
            failed_items: Set(0),
            skipped_items: Set(0),
            triggered_by: Set(new_job.triggered_by),
            source: Set(new_job.source),
            started_at: Set(Some(now)),
            completed_at: Set(None),
            duration_seconds: Set(None),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let job = job.insert(&self.db).await?;

        tracing::debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            total_items = ?job.total_items,
            "Sync job created"
        );

        Ok(job)
    }

    /// Attach a new item to a job in `processing` state.
    pub async fn add_item(
        &self,
        job_id: Uuid,
        new_item: NewSyncItem,
    ) -> Result<sync_item::Model, RepositoryError> {
        let now = Utc::now().fixed_offset();

        let item = sync_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            sync_job_id: Set(job_id),
            netsuite_item_id: Set(new_item.netsuite_item_id),
            netsuite_internal_id: Set(new_item.netsuite_internal_id),
            opms_item_id: Set(new_item.opms_item_id),
            opms_product_id: Set(new_item.opms_product_id),
            item_code: Set(new_item.item_code),
            status: Set(ItemStatus::Processing.as_str().to_string()),
            sync_fields: Set(None),
            pricing_data: Set(new_item.pricing_data),
            pricing_before: Set(None),
            pricing_after: Set(None),
            error_message: Set(None),
            skip_reason: Set(None),
            retry_count: Set(new_item.retry_count.max(0)),
            max_retries: Set(new_item.max_retries.max(0)),
            processed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(item.insert(&self.db).await?)
    }

    /// Write an item's final status and audit fields in one update.
    ///
    /// Items already in a terminal status are rejected.
    pub async fn complete_item(
        &self,
        item_id: Uuid,
        completion: ItemCompletion,
    ) -> Result<sync_item::Model, RepositoryError> {
        let item = SyncItemEntity::find_by_id(item_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| RepositoryError::not_found("sync item", item_id))?;

        let current: ItemStatus = parse_column("sync_items.status", &item.status)?;
        if current.is_terminal() {
            return Err(RepositoryError::TerminalItem {
                id: item_id.to_string(),
                status: item.status,
            });
        }

        let now = Utc::now().fixed_offset();
        let mut active: sync_item::ActiveModel = item.into();
        active.status = Set(completion.status.as_str().to_string());
        active.error_message = Set(completion.error_message);
        active.skip_reason = Set(completion.skip_reason);
        if let Some(fields) = completion.sync_fields {
            active.sync_fields = Set(Some(to_json("sync_fields", &fields)?));
        }
        if let Some(before) = completion.pricing_before {
            active.pricing_before = Set(Some(to_json("pricing_before", &before)?));
        }
        if let Some(after) = completion.pricing_after {
            active.pricing_after = Set(Some(to_json("pricing_after", &after)?));
        }
        if completion.netsuite_internal_id.is_some() {
            active.netsuite_internal_id = Set(completion.netsuite_internal_id);
        }
        if completion.opms_item_id.is_some() {
            active.opms_item_id = Set(completion.opms_item_id);
        }
        if completion.opms_product_id.is_some() {
            active.opms_product_id = Set(completion.opms_product_id);
        }
        active.processed_at = Set(Some(now));
        active.updated_at = Set(now);

        Ok(active.update(&self.db).await?)
    }

    /// Count one processed item against the job's counters.
    pub async fn record_item_outcome(
        &self,
        job_id: Uuid,
        outcome: ItemStatus,
    ) -> Result<(), RepositoryError> {
        let counter = match outcome {
            ItemStatus::Success => sync_job::Column::SuccessfulItems,
            ItemStatus::Skipped => sync_job::Column::SkippedItems,
            ItemStatus::Failed => sync_job::Column::FailedItems,
            ItemStatus::Pending | ItemStatus::Processing => {
                return Err(RepositoryError::Corrupt {
                    column: "sync_items.status",
                    message: format!("{} is not an outcome", outcome),
                });
            }
        };

        let result = SyncJobEntity::update_many()
            .col_expr(
                sync_job::Column::ProcessedItems,
                Expr::col(sync_job::Column::ProcessedItems).add(1),
            )
            .col_expr(counter, Expr::col(counter).add(1))
            .col_expr(
                sync_job::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(sync_job::Column::Id.eq(job_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("sync job", job_id));
        }
        Ok(())
    }

    /// Close a job: `failed` when any item failed permanently, `completed` otherwise.
    pub async fn finish_job(
        &self,
        job_id: Uuid,
        permanent_failure: bool,
        error_message: Option<String>,
    ) -> Result<sync_job::Model, RepositoryError> {
        let job = self.get_job(job_id).await?;

        let now = Utc::now().fixed_offset();
        let duration = job
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0);
        let status = if permanent_failure {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        let mut active: sync_job::ActiveModel = job.into();
        active.status = Set(status.as_str().to_string());
        active.completed_at = Set(Some(now));
        active.duration_seconds = Set(duration);
        active.error_message = Set(error_message);
        active.updated_at = Set(now);

        let job = active.update(&self.db).await?;

        tracing::info!(
            job_id = %job.id,
            status = %job.status,
            processed = job.processed_items,
            successful = job.successful_items,
            failed = job.failed_items,
            skipped = job.skipped_items,
            "Sync job finished"
        );

        Ok(job)
    }

    pub async fn find_job(&self, job_id: Uuid) -> Result<Option<sync_job::Model>, RepositoryError> {
        Ok(SyncJobEntity::find_by_id(job_id).one(&self.db).await?)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<sync_job::Model, RepositoryError> {
        self.find_job(job_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("sync job", job_id))
    }

    pub async fn find_item(
        &self,
        item_id: Uuid,
    ) -> Result<Option<sync_item::Model>, RepositoryError> {
        Ok(SyncItemEntity::find_by_id(item_id).one(&self.db).await?)
    }

    /// Items of a job in creation order.
    pub async fn items_for_job(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<sync_item::Model>, RepositoryError> {
        Ok(SyncItemEntity::find()
            .filter(sync_item::Column::SyncJobId.eq(job_id))
            .order_by_asc(sync_item::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// Jobs newest first.
    pub async fn list_jobs(
        &self,
        filter: JobListFilter,
    ) -> Result<Vec<sync_job::Model>, RepositoryError> {
        let mut query = SyncJobEntity::find().order_by_desc(sync_job::Column::CreatedAt);

        if let Some(status) = filter.status {
            query = query.filter(sync_job::Column::Status.eq(status.as_str()));
        }
        if let Some(job_type) = filter.job_type {
            query = query.filter(sync_job::Column::JobType.eq(job_type.as_str()));
        }

        Ok(query
            .offset(filter.offset)
            .limit(filter.limit)
            .all(&self.db)
            .await?)
    }

    /// Jobs matching the same filters as [`Self::list_jobs`], ignoring paging.
    pub async fn count_jobs(
        &self,
        status: Option<JobStatus>,
        job_type: Option<JobType>,
    ) -> Result<u64, RepositoryError> {
        let mut query = SyncJobEntity::find();
        if let Some(status) = status {
            query = query.filter(sync_job::Column::Status.eq(status.as_str()));
        }
        if let Some(job_type) = job_type {
            query = query.filter(sync_job::Column::JobType.eq(job_type.as_str()));
        }
        Ok(query.count(&self.db).await?)
    }

    /// Fail `running` jobs with no progress for `stale_after`, such as those
    /// left behind by a worker that died mid-batch. Returns the number failed.
    pub async fn fail_stale_running(
        &self,
        stale_after: std::time::Duration,
    ) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let cutoff = (now - crate::queue::chrono_duration(stale_after)).fixed_offset();
        let now = now.fixed_offset();

        let result = SyncJobEntity::update_many()
            .col_expr(
                sync_job::Column::Status,
                Expr::value(JobStatus::Failed.as_str()),
            )
            .col_expr(
                sync_job::Column::ErrorMessage,
                Expr::value(format!(
                    "job abandoned: no progress for {}s",
                    stale_after.as_secs()
                )),
            )
            .col_expr(sync_job::Column::CompletedAt, Expr::value(now))
            .col_expr(sync_job::Column::UpdatedAt, Expr::value(now))
            .filter(sync_job::Column::Status.eq(JobStatus::Running.as_str()))
            .filter(sync_job::Column::UpdatedAt.lt(cutoff))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            tracing::warn!(jobs = result.rows_affected, "Failed abandoned sync jobs");
        }

        Ok(result.rows_affected)
    }

    /// Delete finished jobs created before the retention window, with their
    /// items and log lines, in one transaction.
    pub async fn purge_older_than(&self, days: u32) -> Result<JobPurgeStats, RepositoryError> {
        let cutoff = (Utc::now() - ChronoDuration::days(i64::from(days))).fixed_offset();
        let finished = [
            JobStatus::Completed.as_str(),
            JobStatus::Failed.as_str(),
            JobStatus::Cancelled.as_str(),
        ];

        let txn = self.db.begin().await?;

        let job_ids: Vec<Uuid> = SyncJobEntity::find()
            .select_only()
            .column(sync_job::Column::Id)
            .filter(sync_job::Column::CreatedAt.lt(cutoff))
            .filter(sync_job::Column::Status.is_in(finished))
            .into_tuple()
            .all(&txn)
            .await?;

        if job_ids.is_empty() {
            txn.commit().await?;
            return Ok(JobPurgeStats::default());
        }

        let logs = job_log::delete_for_jobs(&txn, &job_ids).await?;
        let items = SyncItemEntity::delete_many()
            .filter(sync_item::Column::SyncJobId.is_in(job_ids.clone()))
            .exec(&txn)
            .await?
            .rows_affected;
        let jobs = SyncJobEntity::delete_many()
            .filter(sync_job::Column::Id.is_in(job_ids))
            .exec(&txn)
            .await?
            .rows_affected;

        txn.commit().await?;

        Ok(JobPurgeStats { jobs, items, logs })
    }
}
