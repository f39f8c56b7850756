//! DryRun entity model
//!
//! Write-once record of a payload that would have been sent or applied,
//! together with its validation verdict and a simulated downstream response.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_dry_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub opms_item_id: Option<i64>,
    pub opms_item_code: Option<String>,
    pub opms_product_id: Option<i64>,

    /// Direction or flavour of the simulated sync, e.g. `ns_to_opms_pricing`
    pub sync_type: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub actual_json_payload: JsonValue,

    /// Size of the serialized payload in bytes
    pub payload_size_bytes: i32,

    /// Number of top-level fields in the payload
    pub field_count: i32,

    /// See `ValidationStatus`
    pub validation_status: String,

    pub would_succeed: bool,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub simulated_errors: Option<JsonValue>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub simulated_response: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
