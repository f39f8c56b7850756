//! # Change Detection
//!
//! Turns catalog change notifications into audit entries and queue work.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::error::SyncError;
use crate::models::types::{Priority, PricingSyncRequest, QueueEventData};
use crate::queue::{EnqueueOutcome, NewQueueEntry, SyncQueue};
use crate::repositories::{
    ChangeLogRepository, ItemSyncStatusRepository, change_log::NewChange,
};

/// A change reported by the catalog side.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub item_id: i64,
    #[serde(default)]
    pub product_id: Option<i64>,
    /// `created`, `updated`, `pricing`, `archived`, ...
    pub change_type: String,
    #[serde(default = "default_change_source")]
    pub change_source: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub change_data: Option<JsonValue>,
    #[serde(default)]
    pub item_code: Option<String>,
    #[serde(default)]
    pub changed_fields: Vec<String>,
    /// ERP pricing to replay onto the catalog instead of pushing the item
    #[serde(default)]
    pub pricing: Option<PricingSyncRequest>,
}

fn default_change_source() -> String {
    "opms".to_string()
}

/// Queue priority for a change type.
pub fn priority_for(change_type: &str) -> Priority {
    match change_type.to_ascii_lowercase().as_str() {
        "created" | "create" | "insert" => Priority::High,
        "updated" | "update" | "pricing" | "pricing_updated" => Priority::Normal,
        _ => Priority::Low,
    }
}

#[derive(Clone)]
pub struct ChangeDetector {
    changes: ChangeLogRepository,
    statuses: ItemSyncStatusRepository,
    queue: Arc<dyn SyncQueue>,
    max_retries: i32,
}

impl ChangeDetector {
    pub fn new(
        changes: ChangeLogRepository,
        statuses: ItemSyncStatusRepository,
        queue: Arc<dyn SyncQueue>,
        max_retries: i32,
    ) -> Self {
        Self {
            changes,
            statuses,
            queue,
            max_retries,
        }
    }

    /// Log the change, make sure the item has a status row, and enqueue it.
    ///
    /// Enqueueing is idempotent per item: an item with active work gets its
    /// existing entry back.
    #[instrument(skip(self, notification), fields(item_id = notification.item_id, change_type = %notification.change_type))]
    pub async fn record_change(
        &self,
        notification: ChangeNotification,
    ) -> Result<EnqueueOutcome, SyncError> {
        if notification.change_type.trim().is_empty() {
            return Err(SyncError::validation("changeType must not be empty"));
        }

        self.changes
            .append(NewChange {
                item_id: notification.item_id,
                product_id: notification.product_id,
                change_type: notification.change_type.clone(),
                change_source: notification.change_source.clone(),
                change_data: notification.change_data.clone(),
            })
            .await?;

        self.statuses.ensure_exists(notification.item_id).await?;

        let priority = priority_for(&notification.change_type);
        let event_data = match notification.pricing {
            Some(request) => QueueEventData::PricingChange { request },
            None => QueueEventData::ItemChange {
                change_type: notification.change_type.clone(),
                item_code: notification.item_code,
                changed_fields: notification.changed_fields,
            },
        };

        let outcome = self
            .queue
            .create_sync_job(NewQueueEntry {
                item_id: notification.item_id,
                product_id: notification.product_id,
                event_type: notification.change_type,
                event_data,
                priority,
                max_retries: self.max_retries,
            })
            .await?;

        info!(
            queue_id = %outcome.entry().id,
            created = outcome.is_created(),
            priority = %priority,
            "Change recorded"
        );

        Ok(outcome)
    }
}
