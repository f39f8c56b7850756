//! Table-backed queue over `opms_sync_queue`.
//!
//! Claiming selects due rows with `FOR UPDATE SKIP LOCKED` on Postgres so
//! concurrent workers never wait on each other's rows; SQLite serializes
//! writers instead. Claimed rows are stamped with a per-batch token and the
//! batch is re-read by that token after commit.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    EnqueueOutcome, LEASE_EXPIRED_MESSAGE, NewQueueEntry, QueueItem, QueueStats, ReclaimStats,
    RetryUpdate, StatusUpdate, SyncQueue, chrono_duration, claim_token, lease_lost,
};
use crate::error::SyncError;
use crate::models::{
    queue_entry::{self, Entity as QueueEntryEntity},
    types::{Priority, QueueEventData, QueueStatus},
};
use crate::repositories::{RepositoryError, parse_column, to_json};

fn utc(value: DateTime<FixedOffset>) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}

impl TryFrom<queue_entry::Model> for QueueItem {
    type Error = RepositoryError;

    fn try_from(model: queue_entry::Model) -> Result<Self, Self::Error> {
        let event_data: QueueEventData =
            serde_json::from_value(model.event_data).map_err(|err| RepositoryError::Corrupt {
                column: "opms_sync_queue.event_data",
                message: err.to_string(),
            })?;

        Ok(QueueItem {
            id: model.id,
            item_id: model.item_id,
            product_id: model.product_id,
            event_type: model.event_type,
            event_data,
            priority: Priority::from_rank(model.priority),
            status: parse_column("opms_sync_queue.status", &model.status)?,
            retry_count: model.retry_count,
            max_retries: model.max_retries,
            retry_at: model.retry_at.map(utc),
            error_message: model.error_message,
            processing_results: model.processing_results,
            claimed_by: model.claimed_by,
            claimed_at: model.claimed_at.map(utc),
            processed_at: model.processed_at.map(utc),
            created_at: utc(model.created_at),
            updated_at: utc(model.updated_at),
        })
    }
}

/// `SyncQueue` persisted in the database.
#[derive(Debug, Clone)]
pub struct DbSyncQueue {
    db: DatabaseConnection,
}

impl DbSyncQueue {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn active_statuses() -> [&'static str; 2] {
        [QueueStatus::Pending.as_str(), QueueStatus::Processing.as_str()]
    }

    /// Fail a claimed row whose payload cannot be decoded so it is not claimed again.
    async fn quarantine(&self, id: Uuid, reason: &str) -> Result<(), SyncError> {
        let now = Utc::now().fixed_offset();
        QueueEntryEntity::update_many()
            .col_expr(
                queue_entry::Column::Status,
                Expr::value(QueueStatus::Failed.as_str()),
            )
            .col_expr(queue_entry::Column::ErrorMessage, Expr::value(reason))
            .col_expr(queue_entry::Column::ClaimedBy, Expr::value(None::<String>))
            .col_expr(
                queue_entry::Column::ClaimedAt,
                Expr::value(None::<DateTime<FixedOffset>>),
            )
            .col_expr(queue_entry::Column::ProcessedAt, Expr::value(now))
            .col_expr(queue_entry::Column::UpdatedAt, Expr::value(now))
            .filter(queue_entry::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Condition matching an entry still held under `claim`.
    fn held(id: Uuid, claim: &str) -> Condition {
        Condition::all()
            .add(queue_entry::Column::Id.eq(id))
            .add(queue_entry::Column::ClaimedBy.eq(claim))
            .add(queue_entry::Column::Status.eq(QueueStatus::Processing.as_str()))
    }

    /// Explain a fenced write that matched no row.
    async fn unheld(&self, id: Uuid, claim: &str) -> SyncError {
        match QueueEntryEntity::find_by_id(id).one(&self.db).await {
            Ok(Some(_)) => lease_lost(id, claim),
            Ok(None) => SyncError::not_found(format!("queue entry {} not found", id)),
            Err(err) => err.into(),
        }
    }
}

#[async_trait]
impl SyncQueue for DbSyncQueue {
    async fn create_sync_job(&self, entry: NewQueueEntry) -> Result<EnqueueOutcome, SyncError> {
        let event_data = to_json("opms_sync_queue.event_data", &entry.event_data)?;
        let txn = self.db.begin().await?;

        let existing = QueueEntryEntity::find()
            .filter(queue_entry::Column::ItemId.eq(entry.item_id))
            .filter(queue_entry::Column::Status.is_in(Self::active_statuses()))
            .order_by_asc(queue_entry::Column::CreatedAt)
            .one(&txn)
            .await?;

        if let Some(existing) = existing {
            txn.commit().await?;
            debug!(
                item_id = entry.item_id,
                queue_id = %existing.id,
                "Item already has an active queue entry"
            );
            return Ok(EnqueueOutcome::Existing(existing.try_into()?));
        }

        let now = Utc::now().fixed_offset();
        let model = queue_entry::ActiveModel {
            id: Set(Uuid::new_v4()),
            item_id: Set(entry.item_id),
            product_id: Set(entry.product_id),
            event_type: Set(entry.event_type),
            event_data: Set(event_data),
            priority: Set(entry.priority.rank()),
            status: Set(QueueStatus::Pending.as_str().to_string()),
            retry_count: Set(0),
            max_retries: Set(entry.max_retries.max(0)),
            retry_at: Set(None),
            error_message: Set(None),
            processing_results: Set(None),
            claimed_by: Set(None),
            claimed_at: Set(None),
            processed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            item_id = model.item_id,
            queue_id = %model.id,
            priority = model.priority,
            "Queue entry created"
        );

        Ok(EnqueueOutcome::Created(model.try_into()?))
    }

    async fn get_next_batch(
        &self,
        batch_size: u64,
        worker_id: &str,
    ) -> Result<Vec<QueueItem>, SyncError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now().fixed_offset();
        let txn = self.db.begin().await?;

        let due: Vec<Uuid> = QueueEntryEntity::find()
            .select_only()
            .column(queue_entry::Column::Id)
            .filter(queue_entry::Column::Status.eq(QueueStatus::Pending.as_str()))
            .filter(
                Condition::any()
                    .add(queue_entry::Column::RetryAt.is_null())
                    .add(queue_entry::Column::RetryAt.lte(now)),
            )
            .order_by_desc(queue_entry::Column::Priority)
            .order_by_asc(queue_entry::Column::CreatedAt)
            .limit(batch_size)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .into_tuple()
            .all(&txn)
            .await?;

        if due.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        let token = claim_token(worker_id);
        let claimed = QueueEntryEntity::update_many()
            .col_expr(
                queue_entry::Column::Status,
                Expr::value(QueueStatus::Processing.as_str()),
            )
            .col_expr(queue_entry::Column::ClaimedBy, Expr::value(token.clone()))
            .col_expr(queue_entry::Column::ClaimedAt, Expr::value(now))
            .col_expr(queue_entry::Column::UpdatedAt, Expr::value(now))
            .filter(queue_entry::Column::Id.is_in(due))
            .filter(queue_entry::Column::Status.eq(QueueStatus::Pending.as_str()))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        if claimed.rows_affected == 0 {
            return Ok(Vec::new());
        }

        let rows = QueueEntryEntity::find()
            .filter(queue_entry::Column::ClaimedBy.eq(token.as_str()))
            .filter(queue_entry::Column::Status.eq(QueueStatus::Processing.as_str()))
            .order_by_desc(queue_entry::Column::Priority)
            .order_by_asc(queue_entry::Column::CreatedAt)
            .all(&self.db)
            .await?;

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match QueueItem::try_from(row) {
                Ok(item) => batch.push(item),
                Err(err) => {
                    warn!(queue_id = %id, error = %err, "Discarding undecodable queue entry");
                    self.quarantine(id, &err.to_string()).await?;
                }
            }
        }

        debug!(worker_id, claim = %token, claimed = batch.len(), "Claimed queue batch");
        Ok(batch)
    }

    async fn update_status(
        &self,
        id: Uuid,
        claim: &str,
        status: QueueStatus,
        update: StatusUpdate,
    ) -> Result<(), SyncError> {
        let now = Utc::now().fixed_offset();

        let mut query = QueueEntryEntity::update_many()
            .col_expr(queue_entry::Column::Status, Expr::value(status.as_str()))
            .col_expr(queue_entry::Column::UpdatedAt, Expr::value(now));
        if let Some(retry_count) = update.retry_count {
            query = query.col_expr(queue_entry::Column::RetryCount, Expr::value(retry_count));
        }
        if let Some(message) = update.error_message {
            query = query.col_expr(queue_entry::Column::ErrorMessage, Expr::value(message));
        }
        if let Some(results) = update.processing_results {
            query = query.col_expr(queue_entry::Column::ProcessingResults, Expr::value(results));
        }
        if status.is_terminal() {
            query = query.col_expr(queue_entry::Column::ProcessedAt, Expr::value(now));
        }
        if status != QueueStatus::Processing {
            query = query
                .col_expr(queue_entry::Column::ClaimedBy, Expr::value(None::<String>))
                .col_expr(
                    queue_entry::Column::ClaimedAt,
                    Expr::value(None::<DateTime<FixedOffset>>),
                );
        }

        let result = query.filter(Self::held(id, claim)).exec(&self.db).await?;
        if result.rows_affected == 0 {
            return Err(self.unheld(id, claim).await);
        }

        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        claim: &str,
        delay: Duration,
        update: RetryUpdate,
    ) -> Result<(), SyncError> {
        let now = Utc::now();
        let retry_at = (now + chrono_duration(delay)).fixed_offset();
        let now = now.fixed_offset();

        let result = QueueEntryEntity::update_many()
            .col_expr(
                queue_entry::Column::Status,
                Expr::value(QueueStatus::Pending.as_str()),
            )
            .col_expr(queue_entry::Column::RetryCount, Expr::value(update.retry_count))
            .col_expr(
                queue_entry::Column::ErrorMessage,
                Expr::value(update.last_error),
            )
            .col_expr(queue_entry::Column::RetryAt, Expr::value(retry_at))
            .col_expr(queue_entry::Column::ClaimedBy, Expr::value(None::<String>))
            .col_expr(
                queue_entry::Column::ClaimedAt,
                Expr::value(None::<DateTime<FixedOffset>>),
            )
            .col_expr(queue_entry::Column::UpdatedAt, Expr::value(now))
            .filter(Self::held(id, claim))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(self.unheld(id, claim).await);
        }

        debug!(queue_id = %id, retry_at = %retry_at, "Queue entry scheduled for retry");
        Ok(())
    }

    async fn cancel_pending_job(&self, id: Uuid) -> Result<bool, SyncError> {
        let result = QueueEntryEntity::delete_many()
            .filter(queue_entry::Column::Id.eq(id))
            .filter(queue_entry::Column::Status.eq(QueueStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn cleanup_old_jobs(&self, days_to_keep: u32) -> Result<u64, SyncError> {
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(days_to_keep))).fixed_offset();
        let result = QueueEntryEntity::delete_many()
            .filter(queue_entry::Column::Status.is_in([
                QueueStatus::Completed.as_str(),
                QueueStatus::Failed.as_str(),
            ]))
            .filter(queue_entry::Column::ProcessedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn reclaim_stale(&self, stale_after: Duration) -> Result<ReclaimStats, SyncError> {
        let now = Utc::now();
        let cutoff = (now - chrono_duration(stale_after)).fixed_offset();
        let now = now.fixed_offset();

        let stale = Condition::all()
            .add(queue_entry::Column::Status.eq(QueueStatus::Processing.as_str()))
            .add(queue_entry::Column::ClaimedAt.lt(cutoff));

        let failed = QueueEntryEntity::update_many()
            .col_expr(
                queue_entry::Column::Status,
                Expr::value(QueueStatus::Failed.as_str()),
            )
            .col_expr(
                queue_entry::Column::ErrorMessage,
                Expr::value(LEASE_EXPIRED_MESSAGE),
            )
            .col_expr(queue_entry::Column::ClaimedBy, Expr::value(None::<String>))
            .col_expr(
                queue_entry::Column::ClaimedAt,
                Expr::value(None::<DateTime<FixedOffset>>),
            )
            .col_expr(queue_entry::Column::ProcessedAt, Expr::value(now))
            .col_expr(queue_entry::Column::UpdatedAt, Expr::value(now))
            .filter(stale.clone())
            .filter(
                Expr::col(queue_entry::Column::RetryCount)
                    .gte(Expr::col(queue_entry::Column::MaxRetries)),
            )
            .exec(&self.db)
            .await?
            .rows_affected;

        let requeued = QueueEntryEntity::update_many()
            .col_expr(
                queue_entry::Column::Status,
                Expr::value(QueueStatus::Pending.as_str()),
            )
            .col_expr(
                queue_entry::Column::RetryCount,
                Expr::col(queue_entry::Column::RetryCount).add(1),
            )
            .col_expr(
                queue_entry::Column::ErrorMessage,
                Expr::value(LEASE_EXPIRED_MESSAGE),
            )
            .col_expr(
                queue_entry::Column::RetryAt,
                Expr::value(None::<DateTime<FixedOffset>>),
            )
            .col_expr(queue_entry::Column::ClaimedBy, Expr::value(None::<String>))
            .col_expr(
                queue_entry::Column::ClaimedAt,
                Expr::value(None::<DateTime<FixedOffset>>),
            )
            .col_expr(queue_entry::Column::UpdatedAt, Expr::value(now))
            .filter(stale)
            .exec(&self.db)
            .await?
            .rows_affected;

        if requeued > 0 || failed > 0 {
            info!(requeued, failed, "Reclaimed stale queue entries");
        }

        Ok(ReclaimStats { requeued, failed })
    }

    async fn find(&self, id: Uuid) -> Result<Option<QueueItem>, SyncError> {
        let model = QueueEntryEntity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(QueueItem::try_from).transpose()?)
    }

    async fn find_active_for_item(&self, item_id: i64) -> Result<Option<QueueItem>, SyncError> {
        let model = QueueEntryEntity::find()
            .filter(queue_entry::Column::ItemId.eq(item_id))
            .filter(queue_entry::Column::Status.is_in(Self::active_statuses()))
            .order_by_asc(queue_entry::Column::CreatedAt)
            .one(&self.db)
            .await?;
        Ok(model.map(QueueItem::try_from).transpose()?)
    }

    async fn stats(&self) -> Result<QueueStats, SyncError> {
        let count = |status: QueueStatus| {
            QueueEntryEntity::find()
                .filter(queue_entry::Column::Status.eq(status.as_str()))
                .count(&self.db)
        };

        let delayed = QueueEntryEntity::find()
            .filter(queue_entry::Column::Status.eq(QueueStatus::Pending.as_str()))
            .filter(queue_entry::Column::RetryAt.gt(Utc::now().fixed_offset()))
            .count(&self.db)
            .await?;

        Ok(QueueStats {
            pending: count(QueueStatus::Pending).await?,
            delayed,
            processing: count(QueueStatus::Processing).await?,
            completed: count(QueueStatus::Completed).await?,
            failed: count(QueueStatus::Failed).await?,
        })
    }
}
