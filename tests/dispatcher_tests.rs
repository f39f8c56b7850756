//! Integration tests for the queue-draining dispatcher.
//!
//! The ERP is replaced by a scripted client keyed by catalog item id, so
//! outcomes do not depend on the order entries come off the queue.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use opms_sync::config::{AppConfig, RetryPolicyConfig};
use opms_sync::dispatcher::{BatchReport, JobDispatcher};
use opms_sync::erp::{ErpClient, ErpError, ErpPushRequest, ErpPushResult};
use opms_sync::models::types::{
    JobStatus, JobType, Priority, PricingSyncRequest, QueueEventData, QueueStatus,
    RawPricingFields,
};
use opms_sync::queue::{DbSyncQueue, NewQueueEntry, QueueItem, SyncQueue};
use opms_sync::repositories::{
    DryRunRepository, ItemSyncStatusRepository, JobLogRepository, SeaOrmCatalogStore,
    SyncJobRepository,
};
use sea_orm::DatabaseConnection;
use serde_json::json;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{insert_archived_item, insert_item, setup_test_db, stored_pricing, test_config};

/// Succeeds with `NS-<item id>` unless a failure was scripted for the item.
#[derive(Default)]
struct ScriptedErp {
    failures: Mutex<HashMap<i64, ErpError>>,
    crashes: Mutex<HashSet<i64>>,
    takeover: Mutex<Option<Arc<dyn SyncQueue>>>,
    requests: Mutex<Vec<ErpPushRequest>>,
}

impl ScriptedErp {
    fn fail(&self, item_id: i64, error: ErpError) {
        self.failures.lock().unwrap().insert(item_id, error);
    }

    /// Panic while pushing `item_id`.
    fn crash_on(&self, item_id: i64) {
        self.crashes.lock().unwrap().insert(item_id);
    }

    /// While a push is in flight, expire its claim and let `worker-b` take the entry.
    fn hand_over_during_push(&self, queue: Arc<dyn SyncQueue>) {
        *self.takeover.lock().unwrap() = Some(queue);
    }

    fn calls(&self) -> Vec<i64> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.item_id)
            .collect()
    }

    fn known_ids(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.netsuite_item_id.clone())
            .collect()
    }
}

#[async_trait]
impl ErpClient for ScriptedErp {
    async fn push_item(&self, request: &ErpPushRequest) -> Result<ErpPushResult, ErpError> {
        self.requests.lock().unwrap().push(request.clone());

        let takeover = self.takeover.lock().unwrap().clone();
        if let Some(queue) = takeover {
            tokio::time::sleep(Duration::from_millis(5)).await;
            queue.reclaim_stale(Duration::ZERO).await.unwrap();
            let taken = queue.get_next_batch(10, "worker-b").await.unwrap();
            assert_eq!(taken.len(), 1);
        }

        let crash = self.crashes.lock().unwrap().contains(&request.item_id);
        if crash {
            panic!("ERP client crashed pushing item {}", request.item_id);
        }

        if let Some(error) = self.failures.lock().unwrap().remove(&request.item_id) {
            return Err(error);
        }
        Ok(ErpPushResult {
            external_id: format!("NS-{}", request.item_id),
            response: json!({ "success": true }),
        })
    }
}

struct Harness {
    db: DatabaseConnection,
    queue: Arc<dyn SyncQueue>,
    erp: Arc<ScriptedErp>,
    dispatcher: JobDispatcher,
}

fn dispatcher_config() -> AppConfig {
    let mut config = test_config();
    config.dispatcher.worker_id = Some("test-worker".to_string());
    config.retry_policy = RetryPolicyConfig {
        base_seconds: 30,
        max_seconds: 3600,
        jitter_factor: 0.0,
    };
    config
}

async fn harness_with(config: AppConfig, with_erp: bool) -> Harness {
    let db = setup_test_db().await.unwrap();
    let queue: Arc<dyn SyncQueue> = Arc::new(DbSyncQueue::new(db.clone()));
    let erp = Arc::new(ScriptedErp::default());
    let client: Option<Arc<dyn ErpClient>> = if with_erp {
        Some(erp.clone())
    } else {
        None
    };
    let dispatcher = JobDispatcher::new(
        &config,
        db.clone(),
        queue.clone(),
        Arc::new(SeaOrmCatalogStore),
        client,
    );
    Harness {
        db,
        queue,
        erp,
        dispatcher,
    }
}

async fn harness() -> Harness {
    harness_with(dispatcher_config(), true).await
}

async fn enqueue_change(queue: &Arc<dyn SyncQueue>, item_id: i64, max_retries: i32) -> QueueItem {
    queue
        .create_sync_job(NewQueueEntry {
            item_id,
            product_id: None,
            event_type: "item_change".to_string(),
            event_data: QueueEventData::ItemChange {
                change_type: "updated".to_string(),
                item_code: None,
                changed_fields: vec!["code".to_string()],
            },
            priority: Priority::Normal,
            max_retries,
        })
        .await
        .unwrap()
        .entry()
        .clone()
}

async fn queue_entry(queue: &Arc<dyn SyncQueue>, id: uuid::Uuid) -> QueueItem {
    queue.find(id).await.unwrap().expect("queue entry exists")
}

async fn sync_status(db: &DatabaseConnection, item_id: i64) -> String {
    ItemSyncStatusRepository::new(db.clone())
        .find(item_id)
        .await
        .unwrap()
        .expect("item sync status exists")
        .sync_status
}

#[tokio::test]
async fn empty_queue_opens_no_job() {
    let h = harness().await;

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report, BatchReport::default());
    let jobs = SyncJobRepository::new(h.db.clone());
    assert_eq!(jobs.count_jobs(None, None).await.unwrap(), 0);
}

#[tokio::test]
async fn successful_push_completes_entry() {
    let h = harness().await;
    insert_item(&h.db, 7, 70, "OPMS-7").await.unwrap();
    let entry = enqueue_change(&h.queue, 7, 3).await;

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.claimed, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.erp.calls(), vec![7]);

    let stored = queue_entry(&h.queue, entry.id).await;
    assert_eq!(stored.status, QueueStatus::Completed);
    assert!(stored.processed_at.is_some());
    assert_eq!(
        stored.processing_results.as_ref().unwrap()["externalId"],
        "NS-7"
    );

    let statuses = ItemSyncStatusRepository::new(h.db.clone());
    let status = statuses.find(7).await.unwrap().unwrap();
    assert_eq!(status.sync_status, "SUCCESS");
    assert_eq!(status.netsuite_item_id.as_deref(), Some("NS-7"));
    assert_eq!(status.last_error, None);

    let jobs = SyncJobRepository::new(h.db.clone());
    let job = jobs.get_job(report.job_id.unwrap()).await.unwrap();
    assert_eq!(job.job_type, JobType::Item.as_str());
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.triggered_by.as_deref(), Some("test-worker"));
    assert_eq!(job.source.as_deref(), Some("queue"));
    assert_eq!(job.processed_items, 1);
    assert_eq!(job.successful_items, 1);

    let items = jobs.items_for_job(job.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, "success");
    assert_eq!(items[0].opms_item_id, Some(7));
    assert_eq!(items[0].netsuite_internal_id.as_deref(), Some("NS-7"));
    assert_eq!(items[0].sync_fields.as_ref().unwrap()["itemid"], "OPMS-7");

    let item_logs = JobLogRepository::new(h.db.clone())
        .list_for_item(items[0].id)
        .await
        .unwrap();
    assert_eq!(item_logs.len(), 1);
    assert_eq!(item_logs[0].message, "Item synced");
    assert_eq!(item_logs[0].level, "info");
}

#[tokio::test]
async fn known_erp_id_is_sent_with_the_next_push() {
    let h = harness().await;
    insert_item(&h.db, 7, 70, "OPMS-7").await.unwrap();

    enqueue_change(&h.queue, 7, 3).await;
    h.dispatcher.process_batch().await.unwrap();

    let second = enqueue_change(&h.queue, 7, 3).await;
    h.dispatcher.process_batch().await.unwrap();

    assert_eq!(h.erp.calls(), vec![7, 7]);
    assert_eq!(h.erp.known_ids(), vec![None, Some("NS-7".to_string())]);
    let stored = queue_entry(&h.queue, second.id).await;
    assert_eq!(stored.status, QueueStatus::Completed);

    let status = ItemSyncStatusRepository::new(h.db.clone())
        .find(7)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.sync_attempts, 2);
}

#[tokio::test]
async fn transient_failure_schedules_retry() {
    let h = harness().await;
    insert_item(&h.db, 8, 80, "OPMS-8").await.unwrap();
    h.erp.fail(
        8,
        ErpError::Server {
            status: 502,
            message: "bad gateway".to_string(),
        },
    );
    let entry = enqueue_change(&h.queue, 8, 3).await;
    let before = Utc::now();

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.retried, 1);
    assert_eq!(report.failed, 0);

    let stored = queue_entry(&h.queue, entry.id).await;
    assert_eq!(stored.status, QueueStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.error_message.as_deref().unwrap().contains("bad gateway"));
    let retry_at = stored.retry_at.expect("retry_at set");
    assert!(retry_at >= before + ChronoDuration::seconds(29));
    assert!(retry_at <= Utc::now() + ChronoDuration::seconds(31));

    assert_eq!(sync_status(&h.db, 8).await, "FAILED");

    // Item attempt failed, but a retry is pending so the job itself did not.
    let jobs = SyncJobRepository::new(h.db.clone());
    let job = jobs.get_job(report.job_id.unwrap()).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.failed_items, 1);

    let again = h.dispatcher.process_batch().await.unwrap();
    assert_eq!(again.claimed, 0);
}

#[tokio::test]
async fn rate_limit_hint_extends_backoff() {
    let h = harness().await;
    insert_item(&h.db, 9, 90, "OPMS-9").await.unwrap();
    h.erp.fail(9, ErpError::RateLimited { retry_after: 600 });
    let entry = enqueue_change(&h.queue, 9, 3).await;
    let before = Utc::now();

    h.dispatcher.process_batch().await.unwrap();

    let stored = queue_entry(&h.queue, entry.id).await;
    assert_eq!(stored.status, QueueStatus::Pending);
    assert!(stored.retry_at.unwrap() >= before + ChronoDuration::seconds(599));
}

#[tokio::test]
async fn rejection_fails_entry_and_job() {
    let h = harness().await;
    insert_item(&h.db, 10, 100, "OPMS-10").await.unwrap();
    h.erp.fail(
        10,
        ErpError::Rejected {
            status: 400,
            message: "invalid itemid".to_string(),
        },
    );
    let entry = enqueue_change(&h.queue, 10, 3).await;

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.failed, 1);
    let stored = queue_entry(&h.queue, entry.id).await;
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(
        stored.processing_results.as_ref().unwrap()["code"],
        "permanent_error"
    );

    let jobs = SyncJobRepository::new(h.db.clone());
    let job = jobs.get_job(report.job_id.unwrap()).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed.as_str());
    assert!(job.error_message.unwrap().contains("invalid itemid"));

    let logs = JobLogRepository::new(h.db.clone())
        .list_for_job(job.id)
        .await
        .unwrap();
    assert!(logs.iter().any(|log| log.message == "Item failed" && log.level == "error"));
}

#[tokio::test]
async fn transient_failure_without_retries_left_is_final() {
    let h = harness().await;
    insert_item(&h.db, 11, 110, "OPMS-11").await.unwrap();
    h.erp.fail(
        11,
        ErpError::Server {
            status: 503,
            message: "maintenance".to_string(),
        },
    );
    let entry = enqueue_change(&h.queue, 11, 0).await;

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 0);
    assert_eq!(queue_entry(&h.queue, entry.id).await.status, QueueStatus::Failed);
}

#[tokio::test]
async fn archived_item_is_skipped_without_push() {
    let h = harness().await;
    insert_archived_item(&h.db, 12, 120, "OPMS-12").await.unwrap();
    let entry = enqueue_change(&h.queue, 12, 3).await;

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert!(h.erp.calls().is_empty());
    assert_eq!(queue_entry(&h.queue, entry.id).await.status, QueueStatus::Completed);
    assert_eq!(sync_status(&h.db, 12).await, "SUCCESS");

    let jobs = SyncJobRepository::new(h.db.clone());
    let items = jobs.items_for_job(report.job_id.unwrap()).await.unwrap();
    assert_eq!(items[0].status, "skipped");
    assert_eq!(items[0].skip_reason.as_deref(), Some("catalog item is archived"));
}

#[tokio::test]
async fn unknown_item_fails_without_retry() {
    let h = harness().await;
    let entry = enqueue_change(&h.queue, 404, 3).await;

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.failed, 1);
    let stored = queue_entry(&h.queue, entry.id).await;
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.processing_results.as_ref().unwrap()["code"], "not_found");
    assert!(h.erp.calls().is_empty());
}

#[tokio::test]
async fn missing_erp_client_fails_pushes() {
    let h = harness_with(dispatcher_config(), false).await;
    insert_item(&h.db, 13, 130, "OPMS-13").await.unwrap();
    let entry = enqueue_change(&h.queue, 13, 3).await;

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.failed, 1);
    let stored = queue_entry(&h.queue, entry.id).await;
    assert!(stored.error_message.unwrap().contains("not configured"));
}

#[tokio::test]
async fn erp_dry_run_records_payload_instead_of_pushing() {
    let mut config = dispatcher_config();
    config.erp.dry_run = true;
    let h = harness_with(config, true).await;
    insert_item(&h.db, 14, 140, "OPMS-14").await.unwrap();
    let entry = enqueue_change(&h.queue, 14, 3).await;

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert!(h.erp.calls().is_empty());
    assert_eq!(queue_entry(&h.queue, entry.id).await.status, QueueStatus::Completed);

    let records = DryRunRepository::new(h.db.clone())
        .find_by_item(14)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].validation_status, "valid");
    assert!(records[0].would_succeed);
    assert_eq!(records[0].actual_json_payload["itemCode"], "OPMS-14");
}

#[tokio::test]
async fn mixed_batch_counts_every_outcome() {
    let h = harness().await;
    insert_item(&h.db, 21, 210, "OPMS-21").await.unwrap();
    insert_archived_item(&h.db, 22, 220, "OPMS-22").await.unwrap();
    insert_item(&h.db, 23, 230, "OPMS-23").await.unwrap();
    h.erp.fail(23, ErpError::Unauthorized { status: 401 });
    for item_id in [21, 22, 23] {
        enqueue_change(&h.queue, item_id, 3).await;
    }

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.claimed, 3);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 1);

    let job = SyncJobRepository::new(h.db.clone())
        .get_job(report.job_id.unwrap())
        .await
        .unwrap();
    assert_eq!(job.total_items, Some(3));
    assert_eq!(job.processed_items, 3);
    assert_eq!(job.successful_items, 1);
    assert_eq!(job.skipped_items, 1);
    assert_eq!(job.failed_items, 1);
    assert_eq!(job.status, JobStatus::Failed.as_str());

    let stats = h.queue.stats().await.unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn pricing_batch_applies_to_catalog() {
    let h = harness().await;
    insert_item(&h.db, 31, 310, "opmsAPI31").await.unwrap();
    let request = PricingSyncRequest {
        item_code: "opmsAPI31".to_string(),
        skip: false,
        fields: RawPricingFields {
            cut_price: json!(12.5),
            roll_price: json!(10.0),
            cut_cost: json!(6.25),
            roll_cost: json!(5.0),
        },
        netsuite_item_id: Some("4411".to_string()),
    };
    h.queue
        .create_sync_job(NewQueueEntry {
            item_id: 31,
            product_id: Some(310),
            event_type: "pricing_change".to_string(),
            event_data: QueueEventData::PricingChange { request },
            priority: Priority::High,
            max_retries: 3,
        })
        .await
        .unwrap();

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert!(h.erp.calls().is_empty());

    let pricing = stored_pricing(&h.db, 310).await.unwrap();
    assert_eq!(pricing.cut_price, Some(12.5));
    assert_eq!(pricing.roll_cost, Some(5.0));

    let jobs = SyncJobRepository::new(h.db.clone());
    let job = jobs.get_job(report.job_id.unwrap()).await.unwrap();
    assert_eq!(job.job_type, JobType::NsToOpmsPricing.as_str());

    let items = jobs.items_for_job(job.id).await.unwrap();
    assert_eq!(items[0].netsuite_item_id.as_deref(), Some("4411"));
    assert_eq!(items[0].opms_product_id, Some(310));
    assert_eq!(items[0].pricing_after.as_ref().unwrap()["cut_price"], 12.5);
    assert_eq!(items[0].pricing_data.as_ref().unwrap()["roll_price"], 10.0);
}

#[tokio::test]
async fn panicking_push_fails_only_its_entry() {
    let h = harness().await;
    insert_item(&h.db, 41, 410, "OPMS-41").await.unwrap();
    insert_item(&h.db, 42, 420, "OPMS-42").await.unwrap();
    h.erp.crash_on(42);
    let healthy = enqueue_change(&h.queue, 41, 3).await;
    let crashing = enqueue_change(&h.queue, 42, 3).await;

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.claimed, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 0);

    assert_eq!(queue_entry(&h.queue, healthy.id).await.status, QueueStatus::Completed);
    let crashed = queue_entry(&h.queue, crashing.id).await;
    assert_eq!(crashed.status, QueueStatus::Failed);
    assert_eq!(
        crashed.processing_results.as_ref().unwrap()["code"],
        "unexpected_error"
    );
    assert_eq!(sync_status(&h.db, 41).await, "SUCCESS");
    assert_eq!(sync_status(&h.db, 42).await, "FAILED");

    let job = SyncJobRepository::new(h.db.clone())
        .get_job(report.job_id.unwrap())
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed.as_str());
    assert_eq!(job.processed_items, 2);
    assert_eq!(job.successful_items, 1);
    assert_eq!(job.failed_items, 1);
    assert!(job.error_message.unwrap().contains("aborted"));
}

#[tokio::test]
async fn lost_claim_leaves_entry_to_new_owner() {
    let h = harness().await;
    insert_item(&h.db, 43, 430, "OPMS-43").await.unwrap();
    h.erp.hand_over_during_push(h.queue.clone());
    let entry = enqueue_change(&h.queue, 43, 3).await;

    let report = h.dispatcher.process_batch().await.unwrap();

    assert_eq!(report.claimed, 1);
    assert_eq!(h.erp.calls(), vec![43]);

    let stored = queue_entry(&h.queue, entry.id).await;
    assert_eq!(stored.status, QueueStatus::Processing);
    assert!(stored.claimed_by.as_deref().unwrap().starts_with("worker-b:"));
    assert_eq!(stored.retry_count, 1);
    assert!(stored.processed_at.is_none());
    assert!(stored.processing_results.is_none());

    let logs = JobLogRepository::new(h.db.clone())
        .list_for_job(report.job_id.unwrap())
        .await
        .unwrap();
    assert!(
        logs.iter()
            .any(|log| log.message == "Queue claim lost" && log.level == "warn")
    );
}
