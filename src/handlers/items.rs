//! # Item Sync Status Handler

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, not_found};
use crate::models::item_sync_status;
use crate::models::types::ItemSyncState;
use crate::queue::QueueItem;
use crate::repositories::{RepositoryError, parse_column};
use crate::server::AppState;

/// Sync health of one catalog item
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemStatusResponse {
    pub item_id: i64,
    pub sync_status: ItemSyncState,
    pub sync_attempts: i32,
    pub last_sync_at: Option<String>,
    pub last_error: Option<String>,
    pub netsuite_item_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub field_validation_results: Option<JsonValue>,
    /// Pending or in-flight queue entry for the item, if any
    pub active_entry: Option<QueueItem>,
}

impl ItemStatusResponse {
    fn build(
        model: item_sync_status::Model,
        active_entry: Option<QueueItem>,
    ) -> Result<Self, RepositoryError> {
        Ok(Self {
            item_id: model.item_id,
            sync_status: parse_column("opms_item_sync_status.sync_status", &model.sync_status)?,
            sync_attempts: model.sync_attempts,
            last_sync_at: model.last_sync_at.map(|dt| dt.to_rfc3339()),
            last_error: model.last_error,
            netsuite_item_id: model.netsuite_item_id,
            field_validation_results: model.field_validation_results,
            active_entry,
        })
    }
}

/// Get the sync status of a catalog item
#[utoipa::path(
    get,
    path = "/sync/items/{item_id}/status",
    security(("bearer_auth" = [])),
    params(("item_id" = i64, Path, description = "Catalog item ID")),
    responses(
        (status = 200, description = "Item sync status", body = ItemStatusResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Item has never been seen by the sync", body = ApiError)
    ),
    tag = "items"
)]
pub async fn item_status(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(item_id): Path<i64>,
) -> Result<Json<ItemStatusResponse>, ApiError> {
    let Some(model) = state.item_statuses.find(item_id).await? else {
        return Err(not_found(&format!("no sync status for item {}", item_id)));
    };
    let active_entry = state.queue.find_active_for_item(item_id).await?;

    Ok(Json(ItemStatusResponse::build(model, active_entry)?))
}
