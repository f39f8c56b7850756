//! Write-once storage for dry-run records.

use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::RepositoryError;
use crate::models::{
    dry_run::{self, Entity as DryRunEntity},
    types::ValidationStatus,
};

/// A fully computed dry-run row, ready to insert.
#[derive(Debug, Clone)]
pub struct NewDryRun {
    pub opms_item_id: Option<i64>,
    pub opms_item_code: Option<String>,
    pub opms_product_id: Option<i64>,
    pub sync_type: String,
    pub payload: JsonValue,
    pub payload_size_bytes: i32,
    pub field_count: i32,
    pub validation_status: ValidationStatus,
    pub would_succeed: bool,
    pub simulated_errors: Option<JsonValue>,
    pub simulated_response: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct DryRunRepository {
    db: DatabaseConnection,
}

impl DryRunRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn insert(&self, record: NewDryRun) -> Result<dry_run::Model, RepositoryError> {
        let row = dry_run::ActiveModel {
            id: Set(Uuid::new_v4()),
            opms_item_id: Set(record.opms_item_id),
            opms_item_code: Set(record.opms_item_code),
            opms_product_id: Set(record.opms_product_id),
            sync_type: Set(record.sync_type),
            actual_json_payload: Set(record.payload),
            payload_size_bytes: Set(record.payload_size_bytes),
            field_count: Set(record.field_count),
            validation_status: Set(record.validation_status.as_str().to_string()),
            would_succeed: Set(record.would_succeed),
            simulated_errors: Set(record.simulated_errors),
            simulated_response: Set(record.simulated_response),
            created_at: Set(Utc::now().fixed_offset()),
        };

        Ok(row.insert(&self.db).await?)
    }

    pub async fn find_by_item(&self, item_id: i64) -> Result<Vec<dry_run::Model>, RepositoryError> {
        self.find_where(dry_run::Column::OpmsItemId.eq(item_id)).await
    }

    pub async fn find_by_item_code(
        &self,
        item_code: &str,
    ) -> Result<Vec<dry_run::Model>, RepositoryError> {
        self.find_where(dry_run::Column::OpmsItemCode.eq(item_code))
            .await
    }

    pub async fn find_by_sync_type(
        &self,
        sync_type: &str,
    ) -> Result<Vec<dry_run::Model>, RepositoryError> {
        self.find_where(dry_run::Column::SyncType.eq(sync_type)).await
    }

    /// Most recent records regardless of item.
    pub async fn recent(&self, limit: u64) -> Result<Vec<dry_run::Model>, RepositoryError> {
        use sea_orm::QuerySelect;

        Ok(DryRunEntity::find()
            .order_by_desc(dry_run::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    pub async fn delete_by_item(&self, item_id: i64) -> Result<u64, RepositoryError> {
        self.delete_where(dry_run::Column::OpmsItemId.eq(item_id))
            .await
    }

    pub async fn delete_by_sync_type(&self, sync_type: &str) -> Result<u64, RepositoryError> {
        self.delete_where(dry_run::Column::SyncType.eq(sync_type))
            .await
    }

    pub async fn purge_older_than(&self, days: u32) -> Result<u64, RepositoryError> {
        let cutoff = (Utc::now() - ChronoDuration::days(i64::from(days))).fixed_offset();
        self.delete_where(dry_run::Column::CreatedAt.lt(cutoff)).await
    }

    pub async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let result = DryRunEntity::delete_many().exec(&self.db).await?;
        Ok(result.rows_affected)
    }

    async fn find_where(
        &self,
        condition: sea_orm::sea_query::SimpleExpr,
    ) -> Result<Vec<dry_run::Model>, RepositoryError> {
        Ok(DryRunEntity::find()
            .filter(condition)
            .order_by_desc(dry_run::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    async fn delete_where(
        &self,
        condition: sea_orm::sea_query::SimpleExpr,
    ) -> Result<u64, RepositoryError> {
        let result = DryRunEntity::delete_many()
            .filter(condition)
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
