//! Records what a sync would have sent or written, without doing it.

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::models::{dry_run, types::ValidationStatus};
use crate::repositories::{DryRunRepository, RepositoryError, dry_run::NewDryRun};

/// ERP→OPMS pricing applies.
pub const SYNC_TYPE_PRICING: &str = "ns_to_opms_pricing";
/// OPMS→ERP item pushes.
pub const SYNC_TYPE_ITEM_PUSH: &str = "opms_to_ns_item";

#[derive(Debug, Clone, PartialEq)]
pub enum DryRunVerdict {
    Valid,
    Invalid { errors: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct DryRunInput {
    pub opms_item_id: Option<i64>,
    pub opms_item_code: Option<String>,
    pub opms_product_id: Option<i64>,
    pub sync_type: String,
    pub payload: JsonValue,
    pub verdict: DryRunVerdict,
    pub simulated_response: Option<JsonValue>,
}

/// Size in bytes of the serialized payload and its number of top-level fields.
pub fn measure(payload: &JsonValue) -> (i32, i32) {
    let size = serde_json::to_vec(payload).map(|bytes| bytes.len()).unwrap_or(0);
    let fields = match payload {
        JsonValue::Object(map) => map.len(),
        JsonValue::Array(items) => items.len(),
        JsonValue::Null => 0,
        _ => 1,
    };
    (
        i32::try_from(size).unwrap_or(i32::MAX),
        i32::try_from(fields).unwrap_or(i32::MAX),
    )
}

#[derive(Debug, Clone)]
pub struct DryRunRecorder {
    repo: DryRunRepository,
}

impl DryRunRecorder {
    pub fn new(repo: DryRunRepository) -> Self {
        Self { repo }
    }

    pub async fn record(&self, input: DryRunInput) -> Result<dry_run::Model, RepositoryError> {
        let (payload_size_bytes, field_count) = measure(&input.payload);
        let (validation_status, would_succeed, simulated_errors) = match input.verdict {
            DryRunVerdict::Valid => (ValidationStatus::Valid, true, None),
            DryRunVerdict::Invalid { errors } => (
                ValidationStatus::Invalid,
                false,
                Some(JsonValue::from(errors)),
            ),
        };

        let record = self
            .repo
            .insert(NewDryRun {
                opms_item_id: input.opms_item_id,
                opms_item_code: input.opms_item_code,
                opms_product_id: input.opms_product_id,
                sync_type: input.sync_type,
                payload: input.payload,
                payload_size_bytes,
                field_count,
                validation_status,
                would_succeed,
                simulated_errors,
                simulated_response: input.simulated_response,
            })
            .await?;

        debug!(
            dry_run_id = %record.id,
            sync_type = %record.sync_type,
            would_succeed,
            payload_size_bytes,
            "Dry run recorded"
        );

        Ok(record)
    }

    pub fn repository(&self) -> &DryRunRepository {
        &self.repo
    }
}
