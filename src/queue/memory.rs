//! Single-process queue kept in memory. Used by tests and local runs without a
//! database; follows the same contract as [`super::DbSyncQueue`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    EnqueueOutcome, LEASE_EXPIRED_MESSAGE, NewQueueEntry, QueueItem, QueueStats, ReclaimStats,
    RetryUpdate, StatusUpdate, SyncQueue, chrono_duration, claim_token, lease_lost,
};
use crate::error::SyncError;
use crate::models::types::QueueStatus;

#[derive(Debug, Default)]
pub struct InMemorySyncQueue {
    // Insertion order doubles as the created_at tie-breaker.
    entries: Mutex<Vec<QueueItem>>,
}

impl InMemorySyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

fn not_found(id: Uuid) -> SyncError {
    SyncError::not_found(format!("queue entry {} not found", id))
}

/// The entry `id`, provided it is still processing under `claim`.
fn held<'a>(
    entries: &'a mut [QueueItem],
    id: Uuid,
    claim: &str,
) -> Result<&'a mut QueueItem, SyncError> {
    let entry = entries
        .iter_mut()
        .find(|e| e.id == id)
        .ok_or_else(|| not_found(id))?;
    if entry.status != QueueStatus::Processing || entry.claimed_by.as_deref() != Some(claim) {
        return Err(lease_lost(id, claim));
    }
    Ok(entry)
}

#[async_trait]
impl SyncQueue for InMemorySyncQueue {
    async fn create_sync_job(&self, entry: NewQueueEntry) -> Result<EnqueueOutcome, SyncError> {
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries
            .iter()
            .find(|e| e.item_id == entry.item_id && e.status.is_active())
        {
            return Ok(EnqueueOutcome::Existing(existing.clone()));
        }

        let now = Utc::now();
        let item = QueueItem {
            id: Uuid::new_v4(),
            item_id: entry.item_id,
            product_id: entry.product_id,
            event_type: entry.event_type,
            event_data: entry.event_data,
            priority: entry.priority,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: entry.max_retries.max(0),
            retry_at: None,
            error_message: None,
            processing_results: None,
            claimed_by: None,
            claimed_at: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        entries.push(item.clone());

        Ok(EnqueueOutcome::Created(item))
    }

    async fn get_next_batch(
        &self,
        batch_size: u64,
        worker_id: &str,
    ) -> Result<Vec<QueueItem>, SyncError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        let mut due: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.status == QueueStatus::Pending && e.retry_at.is_none_or(|at| at <= now)
            })
            .map(|(idx, _)| idx)
            .collect();
        due.sort_by(|&a, &b| {
            entries[b]
                .priority
                .rank()
                .cmp(&entries[a].priority.rank())
                .then(entries[a].created_at.cmp(&entries[b].created_at))
        });
        due.truncate(usize::try_from(batch_size).unwrap_or(usize::MAX));

        let token = claim_token(worker_id);
        let mut batch = Vec::with_capacity(due.len());
        for idx in due {
            let entry = &mut entries[idx];
            entry.status = QueueStatus::Processing;
            entry.claimed_by = Some(token.clone());
            entry.claimed_at = Some(now);
            entry.updated_at = now;
            batch.push(entry.clone());
        }

        Ok(batch)
    }

    async fn update_status(
        &self,
        id: Uuid,
        claim: &str,
        status: QueueStatus,
        update: StatusUpdate,
    ) -> Result<(), SyncError> {
        let mut entries = self.entries.lock().await;
        let entry = held(&mut entries, id, claim)?;

        let now = Utc::now();
        entry.status = status;
        if let Some(retry_count) = update.retry_count {
            entry.retry_count = retry_count;
        }
        if update.error_message.is_some() {
            entry.error_message = update.error_message;
        }
        if update.processing_results.is_some() {
            entry.processing_results = update.processing_results;
        }
        if status.is_terminal() {
            entry.processed_at = Some(now);
        }
        if status != QueueStatus::Processing {
            entry.claimed_by = None;
            entry.claimed_at = None;
        }
        entry.updated_at = now;

        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        claim: &str,
        delay: Duration,
        update: RetryUpdate,
    ) -> Result<(), SyncError> {
        let mut entries = self.entries.lock().await;
        let entry = held(&mut entries, id, claim)?;

        let now = Utc::now();
        entry.status = QueueStatus::Pending;
        entry.retry_count = update.retry_count;
        entry.error_message = Some(update.last_error);
        entry.retry_at = Some(now + chrono_duration(delay));
        entry.claimed_by = None;
        entry.claimed_at = None;
        entry.updated_at = now;

        Ok(())
    }

    async fn cancel_pending_job(&self, id: Uuid) -> Result<bool, SyncError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| !(e.id == id && e.status == QueueStatus::Pending));
        Ok(entries.len() < before)
    }

    async fn cleanup_old_jobs(&self, days_to_keep: u32) -> Result<u64, SyncError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_to_keep));
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| {
            !(e.status.is_terminal() && e.processed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - entries.len()) as u64)
    }

    async fn reclaim_stale(&self, stale_after: Duration) -> Result<ReclaimStats, SyncError> {
        let now = Utc::now();
        let cutoff = now - chrono_duration(stale_after);
        let mut stats = ReclaimStats::default();

        let mut entries = self.entries.lock().await;
        for entry in entries.iter_mut().filter(|e| {
            e.status == QueueStatus::Processing && e.claimed_at.is_some_and(|at| at < cutoff)
        }) {
            if entry.can_retry() {
                entry.status = QueueStatus::Pending;
                entry.retry_count += 1;
                entry.retry_at = None;
                stats.requeued += 1;
            } else {
                entry.status = QueueStatus::Failed;
                entry.processed_at = Some(now);
                stats.failed += 1;
            }
            entry.error_message = Some(LEASE_EXPIRED_MESSAGE.to_string());
            entry.claimed_by = None;
            entry.claimed_at = None;
            entry.updated_at = now;
        }

        Ok(stats)
    }

    async fn find(&self, id: Uuid) -> Result<Option<QueueItem>, SyncError> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn find_active_for_item(&self, item_id: i64) -> Result<Option<QueueItem>, SyncError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .find(|e| e.item_id == item_id && e.status.is_active())
            .cloned())
    }

    async fn stats(&self) -> Result<QueueStats, SyncError> {
        let now = Utc::now();
        let entries = self.entries.lock().await;
        let mut stats = QueueStats::default();
        for entry in entries.iter() {
            match entry.status {
                QueueStatus::Pending => {
                    stats.pending += 1;
                    if entry.retry_at.is_some_and(|at| at > now) {
                        stats.delayed += 1;
                    }
                }
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
