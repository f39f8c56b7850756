//! # Dry Run Handlers
//!
//! Inspect and prune the payloads recorded instead of real writes.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::handlers::page_limit;
use crate::models::dry_run;
use crate::models::types::ValidationStatus;
use crate::repositories::{RepositoryError, parse_column};
use crate::server::AppState;

const DEFAULT_LIMIT: u64 = 50;
const MAX_LIMIT: u64 = 500;

/// Query parameters for listing dry runs; the first filter given wins
#[derive(Debug, Deserialize)]
pub struct ListDryRunsQuery {
    pub item_id: Option<i64>,
    pub item_code: Option<String>,
    pub sync_type: Option<String>,
    /// Only used without a filter (default: 50, max: 500)
    pub limit: Option<u64>,
}

/// Query parameters for deleting dry runs
#[derive(Debug, Deserialize)]
pub struct DeleteDryRunsQuery {
    pub item_id: Option<i64>,
    pub sync_type: Option<String>,
    pub older_than_days: Option<u32>,
    /// Must be `true` to delete every record
    #[serde(default)]
    pub all: bool,
}

/// A recorded dry run
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DryRunInfo {
    pub id: Uuid,
    pub opms_item_id: Option<i64>,
    pub opms_item_code: Option<String>,
    pub opms_product_id: Option<i64>,
    #[schema(example = "ns_to_opms_pricing")]
    pub sync_type: String,
    /// The exact payload that would have been written or sent
    #[schema(value_type = Object)]
    pub payload: JsonValue,
    pub payload_size_bytes: i32,
    pub field_count: i32,
    pub validation_status: ValidationStatus,
    pub would_succeed: bool,
    #[schema(value_type = Option<Object>)]
    pub simulated_errors: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub simulated_response: Option<JsonValue>,
    pub created_at: String,
}

impl TryFrom<dry_run::Model> for DryRunInfo {
    type Error = RepositoryError;

    fn try_from(model: dry_run::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            opms_item_id: model.opms_item_id,
            opms_item_code: model.opms_item_code,
            opms_product_id: model.opms_product_id,
            sync_type: model.sync_type,
            payload: model.actual_json_payload,
            payload_size_bytes: model.payload_size_bytes,
            field_count: model.field_count,
            validation_status: parse_column(
                "sync_dry_runs.validation_status",
                &model.validation_status,
            )?,
            would_succeed: model.would_succeed,
            simulated_errors: model.simulated_errors,
            simulated_response: model.simulated_response,
            created_at: model.created_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteDryRunsResponse {
    pub deleted: u64,
}

/// List recorded dry runs
#[utoipa::path(
    get,
    path = "/sync/dry-runs",
    security(("bearer_auth" = [])),
    params(
        ("item_id" = Option<i64>, Query, description = "Catalog item ID"),
        ("item_code" = Option<String>, Query, description = "Catalog item code"),
        ("sync_type" = Option<String>, Query, description = "ns_to_opms_pricing or opms_to_ns_item"),
        ("limit" = Option<u64>, Query, description = "Most recent N when no filter is given")
    ),
    responses(
        (status = 200, description = "Dry runs, newest first", body = [DryRunInfo]),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "dry-runs"
)]
pub async fn list_dry_runs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(params): Query<ListDryRunsQuery>,
) -> Result<Json<Vec<DryRunInfo>>, ApiError> {
    let repo = state.dry_runs.repository();

    let models = if let Some(item_id) = params.item_id {
        repo.find_by_item(item_id).await?
    } else if let Some(code) = params.item_code.as_deref().filter(|c| !c.trim().is_empty()) {
        repo.find_by_item_code(code.trim()).await?
    } else if let Some(sync_type) = params.sync_type.as_deref().filter(|s| !s.trim().is_empty()) {
        repo.find_by_sync_type(sync_type.trim()).await?
    } else {
        let limit = page_limit(params.limit, DEFAULT_LIMIT, MAX_LIMIT)?;
        repo.recent(limit).await?
    };

    let records = models
        .into_iter()
        .map(DryRunInfo::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(records))
}

/// Delete dry runs by item, sync type or age
#[utoipa::path(
    delete,
    path = "/sync/dry-runs",
    security(("bearer_auth" = [])),
    params(
        ("item_id" = Option<i64>, Query, description = "Delete records for this item"),
        ("sync_type" = Option<String>, Query, description = "Delete records of this sync type"),
        ("older_than_days" = Option<u32>, Query, description = "Delete records older than N days"),
        ("all" = Option<bool>, Query, description = "Delete every record")
    ),
    responses(
        (status = 200, description = "Records deleted", body = DeleteDryRunsResponse),
        (status = 400, description = "No filter given", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "dry-runs"
)]
pub async fn delete_dry_runs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(params): Query<DeleteDryRunsQuery>,
) -> Result<Json<DeleteDryRunsResponse>, ApiError> {
    let repo = state.dry_runs.repository();

    let deleted = if let Some(item_id) = params.item_id {
        repo.delete_by_item(item_id).await?
    } else if let Some(sync_type) = params.sync_type.as_deref().filter(|s| !s.trim().is_empty()) {
        repo.delete_by_sync_type(sync_type.trim()).await?
    } else if let Some(days) = params.older_than_days {
        repo.purge_older_than(days).await?
    } else if params.all {
        repo.delete_all().await?
    } else {
        return Err(validation_error(
            "A delete filter is required",
            json!({ "filter": "one of item_id, sync_type, older_than_days or all=true" }),
        ));
    };

    tracing::info!(deleted, "Dry run records deleted");
    Ok(Json(DeleteDryRunsResponse { deleted }))
}
