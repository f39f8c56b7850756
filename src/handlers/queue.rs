//! # Queue API Handlers
//!
//! Catalog change intake and operator controls for the OPMS→ERP queue.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::engine::ChangeNotification;
use crate::error::{ApiError, conflict, not_found};
use crate::models::types::QueueStatus;
use crate::queue::{QueueItem, QueueStats};
use crate::server::AppState;

/// Result of recording a catalog change
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    /// False when the item already had active work and that entry is returned
    pub created: bool,
    pub entry: QueueItem,
}

/// Record a catalog change and queue the item for sync
#[utoipa::path(
    post,
    path = "/sync/changes",
    security(("bearer_auth" = [])),
    request_body = ChangeNotification,
    responses(
        (status = 202, description = "Change queued", body = EnqueueResponse),
        (status = 200, description = "Item already queued; existing entry returned", body = EnqueueResponse),
        (status = 400, description = "Invalid change", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "queue"
)]
pub async fn record_change(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<ChangeNotification>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let Json(notification) = payload?;
    let outcome = state.change_detector.record_change(notification).await?;

    let status = if outcome.is_created() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(EnqueueResponse {
            created: outcome.is_created(),
            entry: outcome.entry().clone(),
        }),
    ))
}

/// Queue depth by status
#[utoipa::path(
    get,
    path = "/sync/queue/stats",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Queue counts", body = QueueStats),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "queue"
)]
pub async fn queue_stats(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.queue.stats().await?))
}

/// Cancel a queue entry that has not been claimed yet
#[utoipa::path(
    delete,
    path = "/sync/queue/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Queue entry ID")),
    responses(
        (status = 204, description = "Entry cancelled"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Entry not found", body = ApiError),
        (status = 409, description = "Entry is no longer pending", body = ApiError)
    ),
    tag = "queue"
)]
pub async fn cancel_entry(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let Some(entry) = state.queue.find(id).await? else {
        return Err(not_found(&format!("queue entry {} not found", id)));
    };

    if entry.status != QueueStatus::Pending {
        return Err(conflict(&format!(
            "queue entry {} is {} and cannot be cancelled",
            id, entry.status
        )));
    }

    // The entry may have been claimed between the lookup and the delete.
    if !state.queue.cancel_pending_job(id).await? {
        return Err(conflict(&format!(
            "queue entry {} was claimed before it could be cancelled",
            id
        )));
    }

    tracing::info!(queue_entry_id = %id, item_id = entry.item_id, "Queue entry cancelled");
    Ok(StatusCode::NO_CONTENT)
}
