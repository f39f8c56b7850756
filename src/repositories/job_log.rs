//! Append-only log lines attached to a sync job or to one of its items.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::RepositoryError;
use crate::models::{
    job_log::{self, Entity as JobLogEntity},
    types::LogLevel,
};

/// Repository for job log lines
#[derive(Debug, Clone)]
pub struct JobLogRepository {
    db: DatabaseConnection,
}

impl JobLogRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Append one line. `item_id` is `None` for job-level lines.
    pub async fn append(
        &self,
        job_id: Uuid,
        item_id: Option<Uuid>,
        level: LogLevel,
        message: impl Into<String>,
        context: Option<JsonValue>,
    ) -> Result<job_log::Model, RepositoryError> {
        let entry = job_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            sync_job_id: Set(job_id),
            sync_item_id: Set(item_id),
            level: Set(level.as_str().to_string()),
            message: Set(message.into()),
            context: Set(context),
            created_at: Set(Utc::now().fixed_offset()),
        };

        Ok(entry.insert(&self.db).await?)
    }

    /// Lines of a job in the order they were written.
    pub async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<job_log::Model>, RepositoryError> {
        Ok(JobLogEntity::find()
            .filter(job_log::Column::SyncJobId.eq(job_id))
            .order_by_asc(job_log::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// Lines written for one sync item, oldest first.
    pub async fn list_for_item(
        &self,
        item_id: Uuid,
    ) -> Result<Vec<job_log::Model>, RepositoryError> {
        Ok(JobLogEntity::find()
            .filter(job_log::Column::SyncItemId.eq(item_id))
            .order_by_asc(job_log::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    pub async fn purge_for_jobs(&self, job_ids: &[Uuid]) -> Result<u64, RepositoryError> {
        Ok(delete_for_jobs(&self.db, job_ids).await?)
    }
}

/// Delete every line of the given jobs on `conn`, which may be a transaction.
pub(crate) async fn delete_for_jobs<C: ConnectionTrait>(
    conn: &C,
    job_ids: &[Uuid],
) -> Result<u64, DbErr> {
    if job_ids.is_empty() {
        return Ok(0);
    }

    let result = JobLogEntity::delete_many()
        .filter(job_log::Column::SyncJobId.is_in(job_ids.iter().copied()))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
