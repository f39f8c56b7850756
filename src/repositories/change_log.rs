//! Append-only record of catalog change notifications.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::RepositoryError;
use crate::models::change_log::{self, Entity as ChangeLogEntity};

#[derive(Debug, Clone)]
pub struct NewChange {
    pub item_id: i64,
    pub product_id: Option<i64>,
    pub change_type: String,
    pub change_source: String,
    pub change_data: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct ChangeLogRepository {
    db: DatabaseConnection,
}

impl ChangeLogRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn append(&self, change: NewChange) -> Result<change_log::Model, RepositoryError> {
        let entry = change_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            item_id: Set(change.item_id),
            product_id: Set(change.product_id),
            change_type: Set(change.change_type),
            change_source: Set(change.change_source),
            change_data: Set(change.change_data),
            detected_at: Set(Utc::now().fixed_offset()),
        };

        Ok(entry.insert(&self.db).await?)
    }

    /// Changes recorded for an item, newest first.
    pub async fn list_for_item(
        &self,
        item_id: i64,
    ) -> Result<Vec<change_log::Model>, RepositoryError> {
        Ok(ChangeLogEntity::find()
            .filter(change_log::Column::ItemId.eq(item_id))
            .order_by_desc(change_log::Column::DetectedAt)
            .all(&self.db)
            .await?)
    }
}
