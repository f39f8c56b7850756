//! SyncItem entity model
//!
//! One attempt to sync one catalog record inside a [`super::sync_job`]. Holds
//! the applied field set and before/after pricing snapshots for audit.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning job
    pub sync_job_id: Uuid,

    pub netsuite_item_id: Option<String>,
    pub netsuite_internal_id: Option<String>,
    pub opms_item_id: Option<i64>,
    pub opms_product_id: Option<i64>,
    pub item_code: Option<String>,

    /// See `ItemStatus`
    pub status: String,

    /// Field set actually applied or pushed (`SyncFields`)
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub sync_fields: Option<JsonValue>,

    /// Raw inbound pricing payload
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub pricing_data: Option<JsonValue>,

    /// `PricingSnapshot` before the apply
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub pricing_before: Option<JsonValue>,

    /// `PricingSnapshot` re-read after the apply
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub pricing_after: Option<JsonValue>,

    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub processed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_job::Entity",
        from = "Column::SyncJobId",
        to = "super::sync_job::Column::Id",
        on_delete = "Cascade"
    )]
    SyncJob,
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
