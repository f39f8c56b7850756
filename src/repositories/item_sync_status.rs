//! # Item Sync Status Repository
//!
//! One row per catalog item summarising its latest sync attempt. Every
//! write is an upsert so callers never need to know whether the row exists.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::Value as JsonValue;

use super::RepositoryError;
use crate::models::{
    item_sync_status::{self, Entity as ItemSyncStatusEntity},
    types::ItemSyncState,
};

/// Result of one attempt as recorded against the item.
#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub state: ItemSyncState,
    pub error: Option<String>,
    pub netsuite_item_id: Option<String>,
    pub field_validation_results: Option<JsonValue>,
}

impl AttemptResult {
    pub fn success(netsuite_item_id: Option<String>) -> Self {
        Self {
            state: ItemSyncState::Success,
            error: None,
            netsuite_item_id,
            field_validation_results: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: ItemSyncState::Failed,
            error: Some(error.into()),
            netsuite_item_id: None,
            field_validation_results: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ItemSyncStatusRepository {
    db: DatabaseConnection,
}

impl ItemSyncStatusRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        item_id: i64,
    ) -> Result<Option<item_sync_status::Model>, RepositoryError> {
        Ok(ItemSyncStatusEntity::find_by_id(item_id).one(&self.db).await?)
    }

    /// Insert a `NEVER_SYNCED` row unless one already exists.
    pub async fn ensure_exists(
        &self,
        item_id: i64,
    ) -> Result<item_sync_status::Model, RepositoryError> {
        if let Some(existing) = self.find(item_id).await? {
            return Ok(existing);
        }

        let row = item_sync_status::ActiveModel {
            item_id: Set(item_id),
            sync_status: Set(ItemSyncState::NeverSynced.as_str().to_string()),
            sync_attempts: Set(0),
            last_sync_at: Set(None),
            last_error: Set(None),
            netsuite_item_id: Set(None),
            field_validation_results: Set(None),
            updated_at: Set(Utc::now().fixed_offset()),
        };

        match row.insert(&self.db).await {
            Ok(model) => Ok(model),
            // Lost an insert race with another writer.
            Err(err) if crate::error::is_unique_violation(&err) => self
                .find(item_id)
                .await?
                .ok_or_else(|| RepositoryError::not_found("item sync status", item_id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Mark an attempt as started and count it.
    pub async fn mark_in_progress(
        &self,
        item_id: i64,
    ) -> Result<item_sync_status::Model, RepositoryError> {
        let current = self.ensure_exists(item_id).await?;
        let attempts = current.sync_attempts + 1;

        let mut active: item_sync_status::ActiveModel = current.into();
        active.sync_status = Set(ItemSyncState::InProgress.as_str().to_string());
        active.sync_attempts = Set(attempts);
        active.updated_at = Set(Utc::now().fixed_offset());

        Ok(active.update(&self.db).await?)
    }

    /// Record the outcome of the latest attempt.
    pub async fn record_result(
        &self,
        item_id: i64,
        result: AttemptResult,
    ) -> Result<item_sync_status::Model, RepositoryError> {
        let current = self.ensure_exists(item_id).await?;
        let now = Utc::now().fixed_offset();

        let mut active: item_sync_status::ActiveModel = current.into();
        active.sync_status = Set(result.state.as_str().to_string());
        active.last_sync_at = Set(Some(now));
        active.last_error = Set(result.error);
        if result.netsuite_item_id.is_some() {
            active.netsuite_item_id = Set(result.netsuite_item_id);
        }
        if result.field_validation_results.is_some() {
            active.field_validation_results = Set(result.field_validation_results);
        }
        active.updated_at = Set(now);

        Ok(active.update(&self.db).await?)
    }
}
