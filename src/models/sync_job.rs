//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table.
//! A sync job is one unit-of-work batch; its counters are updated after every
//! item so progress is observable mid-run.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// SyncJob entity representing one batch of item attempts
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Origin of the job (see `JobType`)
    pub job_type: String,

    /// Current status of the job (see `JobStatus`)
    pub status: String,

    /// Number of items the job owns; `None` when unknown up front
    pub total_items: Option<i32>,

    pub processed_items: i32,
    pub successful_items: i32,
    pub failed_items: i32,
    pub skipped_items: i32,

    /// Free-text provenance: who or what triggered the job
    pub triggered_by: Option<String>,

    /// Free-text provenance: the channel the job came from (webhook, queue, cli)
    pub source: Option<String>,

    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub duration_seconds: Option<f64>,

    /// Summary error when the job finished failed
    pub error_message: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_item::Entity")]
    SyncItems,
}

impl Related<super::sync_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
