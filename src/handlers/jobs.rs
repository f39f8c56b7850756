//! # Jobs API Handlers
//!
//! Read-only operator views over sync jobs, their items and log lines.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::handlers::page_limit;
use crate::models::types::{ItemStatus, JobStatus, JobType, LogLevel};
use crate::models::{job_log, sync_item, sync_job};
use crate::repositories::{RepositoryError, parse_column, sync_job::JobListFilter};
use crate::server::AppState;

const DEFAULT_LIMIT: u64 = 50;
const MAX_LIMIT: u64 = 200;

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by job status
    pub status: Option<String>,
    /// Filter by job type
    pub job_type: Option<String>,
    /// Maximum number of jobs to return (default: 50, max: 200)
    pub limit: Option<u64>,
    /// Number of jobs to skip
    pub offset: Option<u64>,
}

/// Job information response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "pricing_sync")]
    pub job_type: JobType,
    #[schema(example = "completed")]
    pub status: JobStatus,
    pub total_items: Option<i32>,
    pub processed_items: i32,
    pub successful_items: i32,
    pub failed_items: i32,
    pub skipped_items: i32,
    /// Who or what started the job
    #[schema(example = "netsuite")]
    pub triggered_by: Option<String>,
    #[schema(example = "webhook")]
    pub source: Option<String>,
    #[schema(example = "2025-06-02T10:00:00+00:00")]
    pub started_at: Option<String>,
    #[schema(example = "2025-06-02T10:00:01+00:00")]
    pub completed_at: Option<String>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl TryFrom<sync_job::Model> for JobInfo {
    type Error = RepositoryError;

    fn try_from(model: sync_job::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            job_type: parse_column("sync_jobs.job_type", &model.job_type)?,
            status: parse_column("sync_jobs.status", &model.status)?,
            total_items: model.total_items,
            processed_items: model.processed_items,
            successful_items: model.successful_items,
            failed_items: model.failed_items,
            skipped_items: model.skipped_items,
            triggered_by: model.triggered_by,
            source: model.source,
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            completed_at: model.completed_at.map(|dt| dt.to_rfc3339()),
            duration_seconds: model.duration_seconds,
            error_message: model.error_message,
            created_at: model.created_at.to_rfc3339(),
        })
    }
}

/// One item processed by a job
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobItemInfo {
    pub id: Uuid,
    pub status: ItemStatus,
    pub item_code: Option<String>,
    pub opms_item_id: Option<i64>,
    pub opms_product_id: Option<i64>,
    pub netsuite_item_id: Option<String>,
    pub netsuite_internal_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub sync_fields: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub pricing_before: Option<JsonValue>,
    #[schema(value_type = Option<Object>)]
    pub pricing_after: Option<JsonValue>,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub retry_count: i32,
    pub processed_at: Option<String>,
}

impl TryFrom<sync_item::Model> for JobItemInfo {
    type Error = RepositoryError;

    fn try_from(model: sync_item::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            status: parse_column("sync_items.status", &model.status)?,
            item_code: model.item_code,
            opms_item_id: model.opms_item_id,
            opms_product_id: model.opms_product_id,
            netsuite_item_id: model.netsuite_item_id,
            netsuite_internal_id: model.netsuite_internal_id,
            sync_fields: model.sync_fields,
            pricing_before: model.pricing_before,
            pricing_after: model.pricing_after,
            error_message: model.error_message,
            skip_reason: model.skip_reason,
            retry_count: model.retry_count,
            processed_at: model.processed_at.map(|dt| dt.to_rfc3339()),
        })
    }
}

/// A job log line
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobLogInfo {
    pub id: Uuid,
    pub sync_item_id: Option<Uuid>,
    pub level: LogLevel,
    pub message: String,
    #[schema(value_type = Option<Object>)]
    pub context: Option<JsonValue>,
    pub created_at: String,
}

impl TryFrom<job_log::Model> for JobLogInfo {
    type Error = RepositoryError;

    fn try_from(model: job_log::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            sync_item_id: model.sync_item_id,
            level: parse_column("sync_job_logs.level", &model.level)?,
            message: model.message,
            context: model.context,
            created_at: model.created_at.to_rfc3339(),
        })
    }
}

/// Response payload for the jobs listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobsResponse {
    pub jobs: Vec<JobInfo>,
    /// Jobs matching the filters, ignoring paging
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

/// A job with its items
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobDetailResponse {
    pub job: JobInfo,
    pub items: Vec<JobItemInfo>,
}

fn parse_filter<T>(field: &'static str, value: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|err| {
            validation_error(
                &format!("Invalid {}", field),
                serde_json::json!({ field: err.to_string() }),
            )
        }),
    }
}

/// List sync jobs, newest first
#[utoipa::path(
    get,
    path = "/sync/jobs",
    security(("bearer_auth" = [])),
    params(
        ("status" = Option<JobStatus>, Query, description = "Filter by job status"),
        ("job_type" = Option<JobType>, Query, description = "Filter by job type"),
        ("limit" = Option<u64>, Query, description = "Maximum number of jobs to return (default 50, max 200)"),
        ("offset" = Option<u64>, Query, description = "Number of jobs to skip")
    ),
    responses(
        (status = 200, description = "Jobs matching the filters", body = JobsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let limit = page_limit(params.limit, DEFAULT_LIMIT, MAX_LIMIT)?;
    let offset = params.offset.unwrap_or(0);
    let status = parse_filter::<JobStatus>("status", params.status.as_deref())?;
    let job_type = parse_filter::<JobType>("job_type", params.job_type.as_deref())?;

    let models = state
        .jobs
        .list_jobs(JobListFilter {
            status,
            job_type,
            limit,
            offset,
        })
        .await?;
    let total = state.jobs.count_jobs(status, job_type).await?;

    let jobs = models
        .into_iter()
        .map(JobInfo::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(JobsResponse {
        jobs,
        total,
        limit,
        offset,
    }))
}

/// Get a job with its items
#[utoipa::path(
    get,
    path = "/sync/jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Sync job ID")),
    responses(
        (status = 200, description = "Job details", body = JobDetailResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<JobDetailResponse>, ApiError> {
    let job = state.jobs.get_job(id).await?;
    let items = state
        .jobs
        .items_for_job(id)
        .await?
        .into_iter()
        .map(JobItemInfo::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(JobDetailResponse {
        job: JobInfo::try_from(job)?,
        items,
    }))
}

/// Get the log lines of a job in write order
#[utoipa::path(
    get,
    path = "/sync/jobs/{id}/logs",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Sync job ID")),
    responses(
        (status = 200, description = "Job log lines", body = [JobLogInfo]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job_logs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<JobLogInfo>>, ApiError> {
    state.jobs.get_job(id).await?;

    let logs = state
        .job_logs
        .list_for_job(id)
        .await?
        .into_iter()
        .map(JobLogInfo::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(logs))
}
