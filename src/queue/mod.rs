//! # Sync Queue
//!
//! Durable priority queue of catalog changes waiting to be synced. Workers
//! claim batches with [`SyncQueue::get_next_batch`]; a claimed entry is
//! `PROCESSING` until the worker reports a terminal status or schedules a
//! retry. Entries abandoned by a crashed worker are returned to the queue by
//! [`SyncQueue::reclaim_stale`].
//!
//! Two implementations share the contract: [`DbSyncQueue`] over the
//! `opms_sync_queue` table and [`InMemorySyncQueue`] for single-process runs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::types::{Priority, QueueEventData, QueueStatus};

pub mod db;
pub mod memory;

pub use db::DbSyncQueue;
pub use memory::InMemorySyncQueue;

/// Work to enqueue for a catalog item.
#[derive(Debug, Clone)]
pub struct NewQueueEntry {
    pub item_id: i64,
    pub product_id: Option<i64>,
    pub event_type: String,
    pub event_data: QueueEventData,
    pub priority: Priority,
    pub max_retries: i32,
}

/// A queue entry with its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Uuid,
    pub item_id: i64,
    pub product_id: Option<i64>,
    pub event_type: String,
    pub event_data: QueueEventData,
    pub priority: Priority,
    pub status: QueueStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub processing_results: Option<JsonValue>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Result of an enqueue: either a new entry or the item's active one.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Created(QueueItem),
    Existing(QueueItem),
}

impl EnqueueOutcome {
    pub fn entry(&self) -> &QueueItem {
        match self {
            EnqueueOutcome::Created(entry) | EnqueueOutcome::Existing(entry) => entry,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

/// Optional fields written with a status change.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub retry_count: Option<i32>,
    pub error_message: Option<String>,
    pub processing_results: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct RetryUpdate {
    pub retry_count: i32,
    pub last_error: String,
}

/// Outcome of a stale-claim sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReclaimStats {
    /// Entries returned to `PENDING`
    pub requeued: u64,
    /// Entries that had no retries left
    pub failed: u64,
}

/// Entry counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: u64,
    /// Pending entries whose `retry_at` is still in the future
    pub delayed: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Queue operations used by the change detector, dispatcher and maintenance.
#[async_trait]
pub trait SyncQueue: Send + Sync {
    /// Enqueue unless the item already has a `PENDING` or `PROCESSING` entry.
    async fn create_sync_job(&self, entry: NewQueueEntry) -> Result<EnqueueOutcome, SyncError>;

    /// Claim up to `batch_size` due entries, highest priority then oldest first.
    ///
    /// Only entries this call moved to `PROCESSING` are returned.
    async fn get_next_batch(
        &self,
        batch_size: u64,
        worker_id: &str,
    ) -> Result<Vec<QueueItem>, SyncError>;

    /// Record the outcome of a claimed entry.
    ///
    /// `claim` is the entry's `claimed_by` token. The write only lands while the
    /// entry is still `PROCESSING` under that token; otherwise it fails with a
    /// lease-lost error and the entry is left untouched.
    async fn update_status(
        &self,
        id: Uuid,
        claim: &str,
        status: QueueStatus,
        update: StatusUpdate,
    ) -> Result<(), SyncError>;

    /// Put a claimed entry back to `PENDING`, not claimable for `delay`.
    ///
    /// Fenced on `claim` like [`SyncQueue::update_status`].
    async fn schedule_retry(
        &self,
        id: Uuid,
        claim: &str,
        delay: Duration,
        update: RetryUpdate,
    ) -> Result<(), SyncError>;

    /// Delete an entry only while it is still `PENDING`.
    async fn cancel_pending_job(&self, id: Uuid) -> Result<bool, SyncError>;

    /// Delete `COMPLETED` and `FAILED` entries processed more than `days_to_keep` days ago.
    async fn cleanup_old_jobs(&self, days_to_keep: u32) -> Result<u64, SyncError>;

    /// Release `PROCESSING` entries whose claim is older than `stale_after`.
    async fn reclaim_stale(&self, stale_after: Duration) -> Result<ReclaimStats, SyncError>;

    async fn find(&self, id: Uuid) -> Result<Option<QueueItem>, SyncError>;

    async fn find_active_for_item(&self, item_id: i64) -> Result<Option<QueueItem>, SyncError>;

    async fn stats(&self) -> Result<QueueStats, SyncError>;
}

/// Message stored on entries failed by the stale sweep.
pub(crate) const LEASE_EXPIRED_MESSAGE: &str = "processing lease expired";

pub(crate) fn lease_lost(id: Uuid, claim: &str) -> SyncError {
    SyncError::lease_lost(format!(
        "queue entry {} is no longer processing under claim {}",
        id, claim
    ))
}

pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

pub(crate) fn claim_token(worker_id: &str) -> String {
    format!("{}:{}", worker_id, Uuid::new_v4())
}
