//! Integration tests for the maintenance pass.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use opms_sync::config::MaintenanceConfig;
use opms_sync::engine::dry_run::SYNC_TYPE_PRICING;
use opms_sync::engine::{DryRunInput, DryRunRecorder, DryRunVerdict};
use opms_sync::maintenance::{Maintenance, MaintenanceReport};
use opms_sync::models::types::{
    ItemStatus, JobStatus, JobType, LogLevel, Priority, QueueEventData, QueueStatus,
};
use opms_sync::models::{dry_run, queue_entry, sync_job};
use opms_sync::queue::{DbSyncQueue, NewQueueEntry, ReclaimStats, StatusUpdate, SyncQueue};
use opms_sync::repositories::sync_job::{ItemCompletion, NewSyncItem, NewSyncJob};
use opms_sync::repositories::{DryRunRepository, JobLogRepository, SyncJobRepository};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::setup_test_db;

struct Fixture {
    db: DatabaseConnection,
    queue: Arc<dyn SyncQueue>,
    jobs: SyncJobRepository,
    logs: JobLogRepository,
    dry_runs: DryRunRecorder,
    maintenance: Maintenance,
}

async fn fixture() -> Fixture {
    let db = setup_test_db().await.unwrap();
    let queue: Arc<dyn SyncQueue> = Arc::new(DbSyncQueue::new(db.clone()));
    let jobs = SyncJobRepository::new(db.clone());
    let maintenance = Maintenance::new(
        queue.clone(),
        jobs.clone(),
        DryRunRepository::new(db.clone()),
        MaintenanceConfig::default(),
    );
    Fixture {
        logs: JobLogRepository::new(db.clone()),
        dry_runs: DryRunRecorder::new(DryRunRepository::new(db.clone())),
        db,
        queue,
        jobs,
        maintenance,
    }
}

fn days_ago(days: i64) -> chrono::DateTime<chrono::FixedOffset> {
    (Utc::now() - ChronoDuration::days(days)).fixed_offset()
}

fn entry(item_id: i64, max_retries: i32) -> NewQueueEntry {
    NewQueueEntry {
        item_id,
        product_id: None,
        event_type: "updated".to_string(),
        event_data: QueueEventData::ItemChange {
            change_type: "updated".to_string(),
            item_code: None,
            changed_fields: vec![],
        },
        priority: Priority::Normal,
        max_retries,
    }
}

/// A finished job with one item and one log line.
async fn finished_job(f: &Fixture) -> Uuid {
    let job = f
        .jobs
        .create_job(NewSyncJob {
            job_type: JobType::Item,
            total_items: Some(1),
            triggered_by: Some("test".to_string()),
            source: Some("queue".to_string()),
        })
        .await
        .unwrap();
    let item = f
        .jobs
        .add_item(
            job.id,
            NewSyncItem {
                opms_item_id: Some(1),
                max_retries: 3,
                ..NewSyncItem::default()
            },
        )
        .await
        .unwrap();
    f.jobs
        .complete_item(item.id, ItemCompletion::success())
        .await
        .unwrap();
    f.jobs
        .record_item_outcome(job.id, ItemStatus::Success)
        .await
        .unwrap();
    f.logs
        .append(job.id, Some(item.id), LogLevel::Info, "Item synced", None)
        .await
        .unwrap();
    f.jobs.finish_job(job.id, false, None).await.unwrap();
    job.id
}

async fn backdate_job(db: &DatabaseConnection, id: Uuid, days: i64) {
    sync_job::Entity::update_many()
        .col_expr(sync_job::Column::CreatedAt, Expr::value(days_ago(days)))
        .filter(sync_job::Column::Id.eq(id))
        .exec(db)
        .await
        .unwrap();
}

async fn backdate_dry_run(db: &DatabaseConnection, id: Uuid, days: i64) {
    dry_run::Entity::update_many()
        .col_expr(dry_run::Column::CreatedAt, Expr::value(days_ago(days)))
        .filter(dry_run::Column::Id.eq(id))
        .exec(db)
        .await
        .unwrap();
}

async fn record_dry_run(f: &Fixture, item_id: i64) -> Uuid {
    f.dry_runs
        .record(DryRunInput {
            opms_item_id: Some(item_id),
            opms_item_code: None,
            opms_product_id: None,
            sync_type: SYNC_TYPE_PRICING.to_string(),
            payload: json!({ "cut_price": 1.0 }),
            verdict: DryRunVerdict::Valid,
            simulated_response: None,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn empty_database_reports_nothing() {
    let f = fixture().await;

    let report = f.maintenance.run_once().await.unwrap();

    assert_eq!(report, MaintenanceReport::default());
}

#[tokio::test]
async fn stale_claims_are_released() {
    let f = fixture().await;
    let stale = f.queue.create_sync_job(entry(1, 3)).await.unwrap();
    let fresh = f.queue.create_sync_job(entry(2, 3)).await.unwrap();
    f.queue.get_next_batch(10, "departed-worker").await.unwrap();

    queue_entry::Entity::update_many()
        .col_expr(
            queue_entry::Column::ClaimedAt,
            Expr::value(Some((Utc::now() - ChronoDuration::hours(1)).fixed_offset())),
        )
        .filter(queue_entry::Column::Id.eq(stale.entry().id))
        .exec(&f.db)
        .await
        .unwrap();

    let report = f.maintenance.run_once().await.unwrap();

    assert_eq!(
        report.reclaimed,
        ReclaimStats {
            requeued: 1,
            failed: 0
        }
    );
    let released = f.queue.find(stale.entry().id).await.unwrap().unwrap();
    assert_eq!(released.status, QueueStatus::Pending);
    assert_eq!(released.retry_count, 1);
    assert_eq!(released.claimed_by, None);

    let untouched = f.queue.find(fresh.entry().id).await.unwrap().unwrap();
    assert_eq!(untouched.status, QueueStatus::Processing);
}

#[tokio::test]
async fn retention_purges_old_records_only() {
    let f = fixture().await;

    let old_job = finished_job(&f).await;
    let recent_job = finished_job(&f).await;
    backdate_job(&f.db, old_job, 120).await;

    let old_dry_run = record_dry_run(&f, 1).await;
    let recent_dry_run = record_dry_run(&f, 2).await;
    backdate_dry_run(&f.db, old_dry_run, 45).await;

    let done = f.queue.create_sync_job(entry(3, 3)).await.unwrap();
    let claimed = f.queue.get_next_batch(1, "w").await.unwrap();
    f.queue
        .update_status(
            done.entry().id,
            claimed[0].claimed_by.as_deref().unwrap(),
            QueueStatus::Completed,
            StatusUpdate::default(),
        )
        .await
        .unwrap();
    queue_entry::Entity::update_many()
        .col_expr(queue_entry::Column::ProcessedAt, Expr::value(Some(days_ago(40))))
        .filter(queue_entry::Column::Id.eq(done.entry().id))
        .exec(&f.db)
        .await
        .unwrap();

    let report = f.maintenance.run_once().await.unwrap();

    assert_eq!(report.jobs_deleted, 1);
    assert_eq!(report.job_items_deleted, 1);
    assert_eq!(report.job_logs_deleted, 1);
    assert_eq!(report.dry_runs_deleted, 1);
    assert_eq!(report.queue_entries_deleted, 1);

    assert!(f.jobs.find_job(old_job).await.unwrap().is_none());
    assert!(f.logs.list_for_job(old_job).await.unwrap().is_empty());
    assert!(f.jobs.find_job(recent_job).await.unwrap().is_some());
    assert_eq!(f.jobs.items_for_job(recent_job).await.unwrap().len(), 1);

    let remaining = f.dry_runs.repository().recent(10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, recent_dry_run);

    assert!(f.queue.find(done.entry().id).await.unwrap().is_none());
}

#[tokio::test]
async fn unfinished_jobs_survive_retention() {
    let f = fixture().await;
    let running = f
        .jobs
        .create_job(NewSyncJob {
            job_type: JobType::Manual,
            total_items: None,
            triggered_by: None,
            source: None,
        })
        .await
        .unwrap();
    backdate_job(&f.db, running.id, 365).await;

    let report = f.maintenance.run_once().await.unwrap();

    assert_eq!(report.jobs_deleted, 0);
    assert!(f.jobs.find_job(running.id).await.unwrap().is_some());
}

#[tokio::test]
async fn abandoned_running_jobs_are_failed() {
    let f = fixture().await;
    let open_job = || NewSyncJob {
        job_type: JobType::Item,
        total_items: Some(1),
        triggered_by: Some("departed-worker".to_string()),
        source: Some("queue".to_string()),
    };
    let abandoned = f.jobs.create_job(open_job()).await.unwrap();
    let active = f.jobs.create_job(open_job()).await.unwrap();
    sync_job::Entity::update_many()
        .col_expr(
            sync_job::Column::UpdatedAt,
            Expr::value((Utc::now() - ChronoDuration::hours(1)).fixed_offset()),
        )
        .filter(sync_job::Column::Id.eq(abandoned.id))
        .exec(&f.db)
        .await
        .unwrap();

    let report = f.maintenance.run_once().await.unwrap();

    assert_eq!(report.stale_jobs_failed, 1);
    let failed = f.jobs.get_job(abandoned.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed.as_str());
    assert!(failed.completed_at.is_some());
    assert!(failed.error_message.unwrap().contains("no progress"));

    let running = f.jobs.get_job(active.id).await.unwrap();
    assert_eq!(running.status, JobStatus::Running.as_str());

    // Already failed; a second pass leaves it alone.
    assert_eq!(f.maintenance.run_once().await.unwrap().stale_jobs_failed, 0);
}

#[tokio::test]
async fn job_logs_can_be_purged_per_job() {
    let f = fixture().await;
    let kept = finished_job(&f).await;
    let purged = finished_job(&f).await;

    assert_eq!(f.logs.purge_for_jobs(&[]).await.unwrap(), 0);
    assert_eq!(f.logs.purge_for_jobs(&[purged]).await.unwrap(), 1);

    assert!(f.logs.list_for_job(purged).await.unwrap().is_empty());
    assert_eq!(f.logs.list_for_job(kept).await.unwrap().len(), 1);
}
