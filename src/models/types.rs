//! Typed vocabularies for the string and JSON columns of the sync tables.
//!
//! Columns are stored as text/JSON so the schema stays portable between
//! Postgres and SQLite; these types are the only way the rest of the crate
//! reads or writes them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use utoipa::ToSchema;

/// Returned when a stored or requested value does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Origin of a sync job.
    JobType("job_type") {
        Initial => "initial",
        Item => "item",
        Scheduled => "scheduled",
        Manual => "manual",
        ForceFull => "force_full",
        PricingSync => "pricing_sync",
        NsToOpmsPricing => "ns_to_opms_pricing",
    }
}

string_enum! {
    /// Lifecycle of a sync job.
    JobStatus("job_status") {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

string_enum! {
    /// Lifecycle of a single item attempt inside a job.
    ItemStatus("item_status") {
        Pending => "pending",
        Processing => "processing",
        Success => "success",
        Failed => "failed",
        Skipped => "skipped",
    }
}

impl ItemStatus {
    /// Success and skipped items never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Skipped)
    }
}

string_enum! {
    /// State of an entry in the OPMS→ERP work queue.
    QueueStatus("queue_status") {
        Pending => "PENDING",
        Processing => "PROCESSING",
        Completed => "COMPLETED",
        Failed => "FAILED",
    }
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }
}

string_enum! {
    /// Queue priority. Persisted as an ordinal rank so claim order is a column sort.
    Priority("priority") {
        High => "HIGH",
        Normal => "NORMAL",
        Low => "LOW",
    }
}

impl Priority {
    pub fn rank(&self) -> i16 {
        match self {
            Priority::High => 30,
            Priority::Normal => 20,
            Priority::Low => 10,
        }
    }

    /// Ranks between the named levels round down to the nearest one.
    pub fn from_rank(rank: i16) -> Self {
        if rank >= Priority::High.rank() {
            Priority::High
        } else if rank >= Priority::Normal.rank() {
            Priority::Normal
        } else {
            Priority::Low
        }
    }
}

string_enum! {
    /// Current sync health of a catalog item.
    ItemSyncState("sync_status") {
        NeverSynced => "NEVER_SYNCED",
        Success => "SUCCESS",
        Failed => "FAILED",
        InProgress => "IN_PROGRESS",
    }
}

string_enum! {
    /// Severity of a job log line.
    LogLevel("log_level") {
        Debug => "debug",
        Info => "info",
        Warn => "warn",
        Error => "error",
    }
}

string_enum! {
    /// Verdict recorded with a dry run.
    ValidationStatus("validation_status") {
        Valid => "valid",
        Invalid => "invalid",
    }
}

/// The four pricing inputs as received, before validation.
///
/// Each value is kept as raw JSON so that strings, nulls and other
/// non-numeric input reach the validator instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RawPricingFields {
    #[schema(value_type = Object)]
    pub cut_price: JsonValue,
    #[schema(value_type = Object)]
    pub roll_price: JsonValue,
    #[schema(value_type = Object)]
    pub cut_cost: JsonValue,
    #[schema(value_type = Object)]
    pub roll_cost: JsonValue,
}

impl RawPricingFields {
    pub fn named(&self) -> [(&'static str, &JsonValue); 4] {
        [
            ("cut_price", &self.cut_price),
            ("roll_price", &self.roll_price),
            ("cut_cost", &self.cut_cost),
            ("roll_cost", &self.roll_cost),
        ]
    }
}

/// A request to apply ERP pricing to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PricingSyncRequest {
    pub item_code: String,
    pub skip: bool,
    pub fields: RawPricingFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netsuite_item_id: Option<String>,
}

/// Validated pricing values ready to be written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PricingValues {
    pub cut_price: f64,
    pub roll_price: f64,
    pub cut_cost: f64,
    pub roll_cost: f64,
}

/// Stored pricing state; a field is `None` when its sub-record does not exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PricingSnapshot {
    pub cut_price: Option<f64>,
    pub roll_price: Option<f64>,
    pub cut_cost: Option<f64>,
    pub roll_cost: Option<f64>,
}

impl PricingSnapshot {
    pub fn is_empty(&self) -> bool {
        self.cut_price.is_none()
            && self.roll_price.is_none()
            && self.cut_cost.is_none()
            && self.roll_cost.is_none()
    }
}

impl From<PricingValues> for PricingSnapshot {
    fn from(values: PricingValues) -> Self {
        Self {
            cut_price: Some(values.cut_price),
            roll_price: Some(values.roll_price),
            cut_cost: Some(values.cut_cost),
            roll_cost: Some(values.roll_cost),
        }
    }
}

/// Field set pushed to, or applied from, the ERP for one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = Object)]
pub struct SyncFields(pub BTreeMap<String, JsonValue>);

impl SyncFields {
    pub fn insert(&mut self, key: &str, value: impl Into<JsonValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<PricingValues> for SyncFields {
    fn from(values: PricingValues) -> Self {
        let mut fields = SyncFields::default();
        fields.insert("cut_price", values.cut_price);
        fields.insert("roll_price", values.roll_price);
        fields.insert("cut_cost", values.cut_cost);
        fields.insert("roll_cost", values.roll_cost);
        fields
    }
}

/// Payload of a queue entry. The tag carries the schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", deny_unknown_fields)]
pub enum QueueEventData {
    /// A catalog item changed and must be pushed to the ERP.
    #[serde(rename = "item_change.v1")]
    ItemChange {
        change_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_code: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        changed_fields: Vec<String>,
    },
    /// ERP pricing to replay onto the catalog.
    #[serde(rename = "pricing_change.v1")]
    PricingChange { request: PricingSyncRequest },
}

impl QueueEventData {
    pub fn is_pricing(&self) -> bool {
        matches!(self, QueueEventData::PricingChange { .. })
    }

    pub fn item_code(&self) -> Option<&str> {
        match self {
            QueueEventData::ItemChange { item_code, .. } => item_code.as_deref(),
            QueueEventData::PricingChange { request } => Some(request.item_code.as_str()),
        }
    }
}
