//! # Pricing Webhook
//!
//! Synchronous entry point for ERP pricing changes. Each delivery becomes a
//! one-item `pricing_sync` job that is applied inline, so the response
//! reports the real outcome for the item.

use std::time::Instant;

use axum::{
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
    response::Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::verify_webhook_secret;
use crate::engine::dry_run::SYNC_TYPE_PRICING;
use crate::engine::{DryRunInput, DryRunVerdict, PricingOutcome, PricingPreview};
use crate::error::{ApiError, SyncError, SyncErrorKind, validation_error};
use crate::models::types::{
    ItemStatus, JobType, LogLevel, PricingSyncRequest, RawPricingFields,
};
use crate::repositories::{
    item_sync_status::AttemptResult,
    sync_job::{ItemCompletion, NewSyncItem, NewSyncJob},
};
use crate::server::AppState;

/// Header that turns a delivery into a validation-only dry run.
pub const DRY_RUN_HEADER: &str = "x-dry-run";

/// Item fields carried by the ERP webhook.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct WebhookItemData {
    /// Business item code
    pub itemid: String,
    /// ERP internal id, when the sender includes it
    #[serde(default, alias = "internalid")]
    pub id: Option<String>,
    /// Pricing for this item is managed outside the sync
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub custitemf3_lisa_item: bool,
    /// Customer cut price
    #[serde(default)]
    #[schema(value_type = f64)]
    pub price_1_: JsonValue,
    /// Customer roll price
    #[serde(default, rename = "itemPriceLine2_itemPrice")]
    #[schema(value_type = f64)]
    pub item_price_line2_item_price: JsonValue,
    /// Vendor cut cost
    #[serde(default)]
    #[schema(value_type = f64)]
    pub cost: JsonValue,
    /// Vendor roll cost
    #[serde(default)]
    #[schema(value_type = f64)]
    pub custitem_f3_rollprice: JsonValue,
    #[serde(default)]
    pub lastmodifieddate: Option<String>,
}

/// Webhook request body
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub event_type: String,
    pub item_data: WebhookItemData,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl WebhookEnvelope {
    pub fn pricing_request(&self) -> PricingSyncRequest {
        let item = &self.item_data;
        PricingSyncRequest {
            item_code: item.itemid.trim().to_string(),
            skip: item.custitemf3_lisa_item,
            fields: RawPricingFields {
                cut_price: item.price_1_.clone(),
                roll_price: item.item_price_line2_item_price.clone(),
                cut_cost: item.cost.clone(),
                roll_cost: item.custitem_f3_rollprice.clone(),
            },
            netsuite_item_id: item.id.clone(),
        }
    }
}

/// ERP checkboxes arrive as booleans or as `"T"`/`"F"`.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Bool(flag)) => flag,
        Some(JsonValue::String(text)) => {
            matches!(text.trim().to_ascii_lowercase().as_str(), "t" | "true" | "y" | "yes" | "1")
        }
        Some(JsonValue::Number(number)) => number.as_i64() == Some(1),
        _ => false,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WebhookResult {
    Updated,
    Skipped,
    Error,
}

/// Webhook response body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub result: WebhookResult,
    /// Item code from the delivery
    pub item_id: String,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run_id: Option<Uuid>,
}

impl WebhookResponse {
    fn new(result: WebhookResult, item_id: &str, started: Instant) -> Self {
        Self {
            result,
            item_id: item_id.to_string(),
            processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            reason: None,
            job_id: None,
            dry_run: false,
            dry_run_id: None,
        }
    }
}

fn is_dry_run(headers: &HeaderMap) -> bool {
    headers
        .get(DRY_RUN_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1"))
}

/// Failures reported to the sender as `result: error` rather than as an HTTP error.
fn is_item_error(error: &SyncError) -> bool {
    matches!(
        error.kind,
        SyncErrorKind::Validation | SyncErrorKind::NotFound | SyncErrorKind::Permanent
    )
}

/// Receive an ERP pricing change and apply it to the catalog
#[utoipa::path(
    post,
    path = "/sync/webhook",
    security(("bearer_auth" = [])),
    request_body = WebhookEnvelope,
    params(
        ("X-Dry-Run" = Option<bool>, Header, description = "Validate and record the payload without writing to the catalog")
    ),
    responses(
        (status = 200, description = "Delivery processed; see `result`", body = WebhookResponse, example = json!({
            "result": "updated",
            "itemId": "opmsAPI01",
            "processingTimeMs": 12
        })),
        (status = 400, description = "Malformed envelope", body = ApiError),
        (status = 401, description = "Missing or invalid shared secret", body = ApiError),
        (status = 413, description = "Body exceeds the configured limit", body = ApiError),
        (status = 500, description = "Unhandled error", body = ApiError),
        (status = 503, description = "Temporarily unable to apply; retry later", body = ApiError)
    ),
    tag = "webhook"
)]
pub async fn pricing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<WebhookEnvelope>, JsonRejection>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let started = Instant::now();
    verify_webhook_secret(&state.config, &headers)?;
    let Json(envelope) = payload?;

    if envelope.item_data.itemid.trim().is_empty() {
        return Err(validation_error(
            "Invalid webhook payload",
            json!({ "itemData.itemid": "must not be empty" }),
        ));
    }

    let request = envelope.pricing_request();

    if is_dry_run(&headers) {
        return dry_run(&state, &request, started).await;
    }

    apply(&state, &envelope, &request, started).await
}

async fn apply(
    state: &AppState,
    envelope: &WebhookEnvelope,
    request: &PricingSyncRequest,
    started: Instant,
) -> Result<Json<WebhookResponse>, ApiError> {
    let job = state
        .jobs
        .create_job(NewSyncJob {
            job_type: JobType::PricingSync,
            total_items: Some(1),
            triggered_by: envelope.source.clone().or_else(|| Some(envelope.event_type.clone())),
            source: Some("webhook".to_string()),
        })
        .await?;

    // Every path out of here closes the job.
    let delivered = deliver(state, job.id, request, started).await;
    let failure = match &delivered {
        Ok((_, apply_error)) => apply_error.as_ref().map(ToString::to_string),
        Err(err) => Some(err.to_string()),
    };
    let finished = state
        .jobs
        .finish_job(job.id, failure.is_some(), failure)
        .await;

    let (mut response, apply_error) = delivered.inspect_err(|err| {
        warn!(job_id = %job.id, error = %err, "Webhook delivery aborted");
    })?;
    finished?;

    if let Some(err) = apply_error.filter(|err| !is_item_error(err)) {
        return Err(err.into());
    }

    response.job_id = Some(job.id);
    response.processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        item_code = %request.item_code,
        result = ?response.result,
        processing_time_ms = response.processing_time_ms,
        "Webhook delivery processed"
    );
    Ok(Json(response))
}

/// Apply one delivery inside `job_id` and record it on the job item and the
/// item's sync status. The apply error, if any, is returned alongside the
/// response; `Err` means the bookkeeping itself failed.
async fn deliver(
    state: &AppState,
    job_id: Uuid,
    request: &PricingSyncRequest,
    started: Instant,
) -> Result<(WebhookResponse, Option<SyncError>), SyncError> {
    let item = state
        .jobs
        .add_item(
            job_id,
            NewSyncItem {
                netsuite_item_id: request.netsuite_item_id.clone(),
                item_code: Some(request.item_code.clone()),
                pricing_data: serde_json::to_value(&request.fields).ok(),
                ..NewSyncItem::default()
            },
        )
        .await?;

    let target = state.pricing.locate(&request.item_code).await?;
    if let Some(target) = &target {
        state.item_statuses.mark_in_progress(target.item_id).await?;
    }

    let outcome = state.pricing.apply(request).await;

    let (completion, item_status, response, log) = match &outcome {
        Ok(PricingOutcome::Updated {
            before,
            after,
            target,
            fields,
        }) => (
            ItemCompletion {
                sync_fields: Some(fields.clone()),
                pricing_before: *before,
                pricing_after: Some(*after),
                ..ItemCompletion::success()
            },
            ItemStatus::Success,
            WebhookResponse::new(WebhookResult::Updated, &request.item_code, started),
            (LogLevel::Info, "Pricing applied", json!({ "target": target, "after": after })),
        ),
        Ok(PricingOutcome::Skipped { reason }) => {
            let mut response = WebhookResponse::new(WebhookResult::Skipped, &request.item_code, started);
            response.reason = Some(reason.clone());
            (
                ItemCompletion::skipped(reason.clone()),
                ItemStatus::Skipped,
                response,
                (LogLevel::Info, "Pricing skipped", json!({ "reason": reason })),
            )
        }
        Err(err) => {
            let mut response = WebhookResponse::new(WebhookResult::Error, &request.item_code, started);
            response.reason = Some(err.message.clone());
            (
                ItemCompletion::failed(err.to_string()),
                ItemStatus::Failed,
                response,
                (LogLevel::Error, "Pricing apply failed", json!({ "error": err })),
            )
        }
    };
    let completion = match &target {
        Some(target) => ItemCompletion {
            opms_item_id: Some(target.item_id),
            opms_product_id: Some(target.product_id),
            ..completion
        },
        None => completion,
    };

    if let Some(target) = &target {
        let attempt = match &outcome {
            Ok(PricingOutcome::Updated { .. }) => {
                AttemptResult::success(request.netsuite_item_id.clone())
            }
            Ok(PricingOutcome::Skipped { reason }) => AttemptResult {
                field_validation_results: Some(json!({ "skipped": reason })),
                ..AttemptResult::success(request.netsuite_item_id.clone())
            },
            Err(err) => AttemptResult {
                field_validation_results: err.details.clone(),
                ..AttemptResult::failed(err.to_string())
            },
        };
        state.item_statuses.record_result(target.item_id, attempt).await?;
    }

    state.jobs.complete_item(item.id, completion).await?;
    state.jobs.record_item_outcome(job_id, item_status).await?;
    let (level, message, context) = log;
    if let Err(log_err) = state
        .job_logs
        .append(job_id, Some(item.id), level, message, Some(context))
        .await
    {
        warn!(job_id = %job_id, error = %log_err, "Failed to write job log");
    }

    Ok((response, outcome.err()))
}

async fn dry_run(
    state: &AppState,
    request: &PricingSyncRequest,
    started: Instant,
) -> Result<Json<WebhookResponse>, ApiError> {
    let raw_fields = serde_json::to_value(&request.fields).unwrap_or(JsonValue::Null);

    let (input, mut response) = match state.pricing.preview(request).await {
        Ok(PricingPreview::Ready {
            target,
            before,
            fields,
        }) => (
            DryRunInput {
                opms_item_id: Some(target.item_id),
                opms_item_code: Some(target.item_code.clone()),
                opms_product_id: Some(target.product_id),
                sync_type: SYNC_TYPE_PRICING.to_string(),
                payload: serde_json::to_value(&fields).unwrap_or(JsonValue::Null),
                verdict: DryRunVerdict::Valid,
                simulated_response: Some(json!({ "result": "updated", "before": before })),
            },
            WebhookResponse::new(WebhookResult::Updated, &request.item_code, started),
        ),
        Ok(PricingPreview::Skipped { reason }) => {
            let mut response = WebhookResponse::new(WebhookResult::Skipped, &request.item_code, started);
            response.reason = Some(reason.clone());
            (
                DryRunInput {
                    opms_item_id: None,
                    opms_item_code: Some(request.item_code.clone()),
                    opms_product_id: None,
                    sync_type: SYNC_TYPE_PRICING.to_string(),
                    payload: raw_fields,
                    verdict: DryRunVerdict::Valid,
                    simulated_response: Some(json!({ "result": "skipped", "reason": reason })),
                },
                response,
            )
        }
        Err(err) if is_item_error(&err) => {
            let mut response = WebhookResponse::new(WebhookResult::Error, &request.item_code, started);
            response.reason = Some(err.message.clone());
            (
                DryRunInput {
                    opms_item_id: None,
                    opms_item_code: Some(request.item_code.clone()),
                    opms_product_id: None,
                    sync_type: SYNC_TYPE_PRICING.to_string(),
                    payload: raw_fields,
                    verdict: DryRunVerdict::Invalid {
                        errors: vec![err.message.clone()],
                    },
                    simulated_response: Some(json!({ "result": "error", "error": err })),
                },
                response,
            )
        }
        Err(err) => return Err(err.into()),
    };

    let record = state.dry_runs.record(input).await?;
    response.dry_run = true;
    response.dry_run_id = Some(record.id);
    response.processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    Ok(Json(response))
}
