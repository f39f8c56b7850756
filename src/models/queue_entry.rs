//! QueueEntry entity model for the `opms_sync_queue` table.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A unit of OPMS→ERP work waiting for, or held by, a worker
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "opms_sync_queue")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Catalog item this entry is about; at most one active entry per item
    pub item_id: i64,
    pub product_id: Option<i64>,
    pub event_type: String,

    /// Serialized `QueueEventData`
    #[sea_orm(column_type = "JsonBinary")]
    pub event_data: JsonValue,

    /// `Priority::rank`; higher is claimed first
    pub priority: i16,

    /// See `QueueStatus`
    pub status: String,

    pub retry_count: i32,
    pub max_retries: i32,

    /// Not eligible for claiming before this instant
    pub retry_at: Option<DateTimeWithTimeZone>,

    pub error_message: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub processing_results: Option<JsonValue>,

    /// Claim token of the batch holding this entry
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTimeWithTimeZone>,

    pub processed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
