//! Current sync health of one catalog item.
//!
//! Distinct from the job-scoped [`super::sync_item`] history: this row is
//! upserted on every attempt and always describes the latest outcome.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "opms_item_sync_status")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub item_id: i64,

    /// See `ItemSyncState`
    pub sync_status: String,

    pub sync_attempts: i32,
    pub last_sync_at: Option<DateTimeWithTimeZone>,
    pub last_error: Option<String>,
    pub netsuite_item_id: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub field_validation_results: Option<JsonValue>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
