//! # Error Handling
//!
//! Two layers live here:
//!
//! * [`ApiError`], the problem+json response returned by every HTTP handler,
//!   carrying the request trace ID.
//! * [`SyncError`], the domain taxonomy produced by sync attempts. Its kind
//!   decides whether the dispatcher retries an item.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, RuntimeErr};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the active request (falls back to a generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

fn sqlx_error(error: &DbErr) -> Option<&sea_orm::sqlx::Error> {
    match error {
        DbErr::Conn(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => Some(sqlx_err),
        _ => None,
    }
}

fn database_error_code(error: &DbErr) -> Option<String> {
    sqlx_error(error)
        .and_then(|sqlx_err| sqlx_err.as_database_error())
        .and_then(|db_error| db_error.code().map(|code| code.into_owned()))
}

pub(crate) fn is_unique_violation(error: &DbErr) -> bool {
    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let Some(db_error) = sqlx_error(error).and_then(|e| e.as_database_error()) else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .map(|code| code.as_ref() == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
        .unwrap_or(false)
}

/// True for database failures that are worth retrying: lost connections,
/// pool exhaustion, deadlocks, lock and serialization timeouts, SQLite busy.
pub fn is_transient_db_error(error: &DbErr) -> bool {
    // serialization_failure, deadlock_detected, lock_not_available,
    // admin_shutdown, connection_exception family
    const PG_TRANSIENT: &[&str] = &["40001", "40P01", "55P03", "57P01", "08000", "08003", "08006"];
    // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
    const SQLITE_TRANSIENT: &[&str] = &["5", "6", "261", "262", "517"];

    match error {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => return true,
        _ => {}
    }

    if let Some(sqlx_err) = sqlx_error(error)
        && matches!(
            sqlx_err,
            sea_orm::sqlx::Error::Io(_)
                | sea_orm::sqlx::Error::PoolTimedOut
                | sea_orm::sqlx::Error::PoolClosed
        )
    {
        return true;
    }

    database_error_code(error)
        .map(|code| PG_TRANSIENT.contains(&code.as_str()) || SQLITE_TRANSIENT.contains(&code.as_str()))
        .unwrap_or(false)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            JsonRejection::BytesRejection(_) => {
                return Self::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "PAYLOAD_TOO_LARGE",
                    "Payload Too Large",
                );
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<DbErr> for ApiError {
    fn from(error: DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => {
                tracing::error!("Database connection error: {:?}", error);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        let api_error = match &error.kind {
            SyncErrorKind::Validation => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &error.message)
            }
            SyncErrorKind::NotFound => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", &error.message),
            SyncErrorKind::Transient { retry_after_secs } => {
                let api_error = Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    &error.message,
                );
                match retry_after_secs {
                    Some(seconds) => api_error.with_retry_after(*seconds),
                    None => api_error,
                }
            }
            SyncErrorKind::Permanent => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "SYNC_FAILED",
                &error.message,
            ),
            SyncErrorKind::LeaseLost => Self::new(StatusCode::CONFLICT, "CONFLICT", &error.message),
            SyncErrorKind::Unexpected => {
                tracing::error!(error = %error, "Unexpected sync error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
        };

        match error.details {
            Some(details) if !matches!(error.kind, SyncErrorKind::Unexpected) => {
                api_error.with_details(details)
            }
            _ => api_error,
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let mut error = unauthorized(message);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

/// Create a not found error (404)
pub fn not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

/// Create a conflict error (409)
pub fn conflict(message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, "CONFLICT", message)
}

/// Domain error produced by a sync attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncError {
    #[serde(flatten)]
    pub kind: SyncErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// Malformed, negative or non-numeric input; rejected before any write
    Validation,
    /// The catalog does not know the item; retrying will not help
    NotFound,
    /// Connection loss, lock timeout, deadlock, upstream 5xx or rate limit
    Transient {
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    /// Upstream rejected the request for good
    Permanent,
    /// Anything else, including panics caught at the item boundary
    Unexpected,
    /// The caller's queue claim was released or taken by another worker
    LeaseLost,
}

impl SyncError {
    fn with_kind<S: Into<String>>(kind: SyncErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::with_kind(SyncErrorKind::Validation, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::with_kind(SyncErrorKind::NotFound, message)
    }

    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::with_kind(
            SyncErrorKind::Transient {
                retry_after_secs: None,
            },
            message,
        )
    }

    pub fn transient_after<S: Into<String>>(retry_after_secs: Option<u64>, message: S) -> Self {
        Self::with_kind(SyncErrorKind::Transient { retry_after_secs }, message)
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self::with_kind(SyncErrorKind::Permanent, message)
    }

    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::with_kind(SyncErrorKind::Unexpected, message)
    }

    pub fn lease_lost<S: Into<String>>(message: S) -> Self {
        Self::with_kind(SyncErrorKind::LeaseLost, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, SyncErrorKind::Transient { .. })
    }

    pub fn is_lease_lost(&self) -> bool {
        matches!(self.kind, SyncErrorKind::LeaseLost)
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self.kind {
            SyncErrorKind::Transient { retry_after_secs } => retry_after_secs,
            _ => None,
        }
    }

    /// Stable short code used in logs and audit records.
    pub fn code(&self) -> &'static str {
        match self.kind {
            SyncErrorKind::Validation => "validation_error",
            SyncErrorKind::NotFound => "not_found",
            SyncErrorKind::Transient { .. } => "transient_error",
            SyncErrorKind::Permanent => "permanent_error",
            SyncErrorKind::Unexpected => "unexpected_error",
            SyncErrorKind::LeaseLost => "lease_lost",
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match &self.kind {
            SyncErrorKind::Validation => "Validation error",
            SyncErrorKind::NotFound => "Not found",
            SyncErrorKind::Transient { .. } => "Transient error",
            SyncErrorKind::Permanent => "Permanent error",
            SyncErrorKind::Unexpected => "Unexpected error",
            SyncErrorKind::LeaseLost => "Lease lost",
        };
        write!(f, "{}: {}", label, self.message)?;
        if let Some(after) = self.retry_after_secs() {
            write!(f, " (retry after: {}s)", after)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyncError {}

impl From<DbErr> for SyncError {
    fn from(error: DbErr) -> Self {
        if is_transient_db_error(&error) {
            tracing::warn!(error = %error, "Transient database error during sync");
            SyncError::transient(format!("database unavailable: {}", error))
        } else {
            tracing::error!(error = ?error, "Database error during sync");
            SyncError::unexpected(format!("database error: {}", error))
                .with_details(json!({ "source": "database" }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
    }

    #[test]
    fn test_content_type_and_retry_after_headers() {
        let error = ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Try later",
        )
        .with_retry_after(30);

        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("retry-after").unwrap(), "30");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Test error",
        );

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn test_from_anyhow_hides_detail() {
        let api_error: ApiError = anyhow::anyhow!("secret detail").into();

        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn test_database_error_mapping() {
        let api_error: ApiError = DbErr::RecordNotFound("sync_job".to_string()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("sync_job"));
    }

    #[test]
    fn test_sync_error_to_api_error() {
        let validation: ApiError = SyncError::validation("bad price")
            .with_details(json!({"cut_price": "must be non-negative"}))
            .into();
        assert_eq!(validation.status, StatusCode::BAD_REQUEST);
        assert!(validation.details.is_some());

        let transient: ApiError = SyncError::transient_after(Some(12), "busy").into();
        assert_eq!(transient.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(transient.retry_after, Some(12));

        let unexpected: ApiError = SyncError::unexpected("boom")
            .with_details(json!({"stack": "hidden"}))
            .into();
        assert_eq!(unexpected.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(unexpected.details.is_none());
    }

    #[test]
    fn test_sync_error_retryability() {
        assert!(SyncError::transient("timeout").is_retryable());
        assert!(!SyncError::validation("bad").is_retryable());
        assert!(!SyncError::not_found("missing").is_retryable());
        assert!(!SyncError::permanent("rejected").is_retryable());
        assert!(!SyncError::unexpected("panic").is_retryable());
        assert!(!SyncError::lease_lost("claim released").is_retryable());
        assert!(SyncError::lease_lost("claim released").is_lease_lost());
        assert_eq!(SyncError::transient_after(Some(9), "slow").retry_after_secs(), Some(9));
    }

    #[test]
    fn test_sync_error_serializes_with_type_tag() {
        let value = serde_json::to_value(SyncError::transient_after(Some(5), "rate limited")).unwrap();
        assert_eq!(value["type"], "transient");
        assert_eq!(value["retry_after_secs"], 5);
        assert_eq!(value["message"], "rate limited");
    }

    #[test]
    fn test_db_error_classification() {
        let custom = DbErr::Custom("nope".into());
        assert!(!is_transient_db_error(&custom));
        let sync_error: SyncError = custom.into();
        assert_eq!(sync_error.code(), "unexpected_error");

        let conn = DbErr::Conn(RuntimeErr::Internal("connection reset".into()));
        assert!(is_transient_db_error(&conn));
        assert!(SyncError::from(conn).is_retryable());
    }

    #[test]
    fn test_display_includes_kind_and_hint() {
        let error = SyncError::transient_after(Some(3), "erp busy");
        assert_eq!(error.to_string(), "Transient error: erp busy (retry after: 3s)");
    }
}
