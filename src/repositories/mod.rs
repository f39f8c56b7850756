//! # Repository Layer
//!
//! One repository per aggregate, each wrapping SeaORM query builders for its
//! table. Repositories speak in the typed vocabularies of
//! [`crate::models::types`] and never leak raw status strings to callers.

use axum::http::StatusCode;
use sea_orm::DbErr;
use thiserror::Error;

use crate::error::{ApiError, SyncError};

pub mod catalog;
pub mod change_log;
pub mod dry_run;
pub mod item_sync_status;
pub mod job_log;
pub mod sync_job;

pub use catalog::{CatalogStore, SeaOrmCatalogStore};
pub use change_log::ChangeLogRepository;
pub use dry_run::DryRunRepository;
pub use item_sync_status::ItemSyncStatusRepository;
pub use job_log::JobLogRepository;
pub use sync_job::SyncJobRepository;

/// Errors surfaced by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("sync item {id} is already {status} and cannot be updated")]
    TerminalItem { id: String, status: String },
    #[error("stored {column} value is invalid: {message}")]
    Corrupt {
        column: &'static str,
        message: String,
    },
    #[error("failed to serialize {column}: {source}")]
    Serialization {
        column: &'static str,
        source: serde_json::Error,
    },
}

impl RepositoryError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub(crate) fn to_json<T: serde::Serialize>(
    column: &'static str,
    value: &T,
) -> Result<serde_json::Value, RepositoryError> {
    serde_json::to_value(value).map_err(|source| RepositoryError::Serialization { column, source })
}

pub(crate) fn parse_column<T>(column: &'static str, value: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|err| RepositoryError::Corrupt {
        column,
        message: err.to_string(),
    })
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(db_err) => db_err.into(),
            RepositoryError::NotFound { entity, id } => ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("{} {} not found", entity, id),
            ),
            RepositoryError::TerminalItem { .. } => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", &error.to_string())
            }
            RepositoryError::Corrupt { .. } | RepositoryError::Serialization { .. } => {
                tracing::error!(error = %error, "Repository data error");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Stored data could not be processed",
                )
            }
        }
    }
}

impl From<RepositoryError> for SyncError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(db_err) => db_err.into(),
            other => SyncError::unexpected(other.to_string()),
        }
    }
}
