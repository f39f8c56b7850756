//! # Job Dispatcher
//!
//! Background worker that drains the sync queue. Each tick claims a batch,
//! opens a sync job for it and runs every entry as its own task so that a
//! failure or panic in one entry never takes the batch down. Outcomes are
//! written to the sync item, the item's sync status, the job log and the
//! job counters after every entry; retryable failures go back on the queue
//! with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use rand::{Rng, thread_rng};
use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{AppConfig, DispatcherConfig, RetryPolicyConfig};
use crate::engine::dry_run::SYNC_TYPE_ITEM_PUSH;
use crate::engine::{DryRunInput, DryRunRecorder, DryRunVerdict, PricingOutcome, PricingSyncEngine};
use crate::erp::{ErpClient, ErpPushRequest};
use crate::error::SyncError;
use crate::models::{
    sync_item,
    types::{
        ItemStatus, JobType, LogLevel, PricingSnapshot, PricingSyncRequest,
        QueueEventData, QueueStatus, SyncFields,
    },
};
use crate::queue::{QueueItem, RetryUpdate, StatusUpdate, SyncQueue};
use crate::repositories::{
    CatalogStore, DryRunRepository, ItemSyncStatusRepository, JobLogRepository, SyncJobRepository,
    item_sync_status::AttemptResult,
    sync_job::{ItemCompletion, NewSyncItem, NewSyncJob},
};

fn claim(entry: &QueueItem) -> &str {
    entry.claimed_by.as_deref().unwrap_or_default()
}

/// Delay before retry number `retry_count + 1`, before jitter.
///
/// `min(base * 2^retry_count, max)`, raised to `retry_after` when the
/// upstream asked for a longer wait.
pub fn base_backoff_secs(
    policy: &RetryPolicyConfig,
    retry_count: i32,
    retry_after: Option<u64>,
) -> f64 {
    let exponent = retry_count.clamp(0, 30);
    let mut backoff =
        (policy.base_seconds as f64 * 2_f64.powi(exponent)).min(policy.max_seconds as f64);
    if let Some(retry_after) = retry_after {
        backoff = backoff.max(retry_after as f64);
    }
    backoff
}

/// [`base_backoff_secs`] plus up to `jitter_factor` of it at random.
pub fn retry_delay(
    policy: &RetryPolicyConfig,
    retry_count: i32,
    retry_after: Option<u64>,
) -> Duration {
    let backoff = base_backoff_secs(policy, retry_count, retry_after);
    let spread = policy.jitter_factor.max(0.0) * backoff;
    let jitter = if spread > 0.0 {
        thread_rng().gen_range(0.0..spread)
    } else {
        0.0
    };
    Duration::from_secs_f64(backoff + jitter)
}

/// How one queue entry ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Success,
    Skipped(String),
    FailedRetryable(SyncError),
    FailedPermanent(SyncError),
}

impl ItemOutcome {
    fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Success => "success",
            ItemOutcome::Skipped(_) => "skipped",
            ItemOutcome::FailedRetryable(_) => "retry",
            ItemOutcome::FailedPermanent(_) => "failed",
        }
    }
}

/// Summary of one `process_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub job_id: Option<Uuid>,
    pub claimed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Result of a successful attempt, before bookkeeping.
#[derive(Debug, Clone)]
enum Attempt {
    Done {
        sync_fields: Option<SyncFields>,
        before: Option<PricingSnapshot>,
        after: Option<PricingSnapshot>,
        external_id: Option<String>,
        results: JsonValue,
    },
    Skipped {
        reason: String,
    },
}

/// Everything an attempt needs; cloned into each spawned task.
#[derive(Clone)]
struct AttemptRunner {
    db: DatabaseConnection,
    catalog: Arc<dyn CatalogStore>,
    pricing: PricingSyncEngine,
    erp: Option<Arc<dyn ErpClient>>,
    erp_dry_run: bool,
    dry_runs: DryRunRecorder,
    statuses: ItemSyncStatusRepository,
}

impl AttemptRunner {
    async fn run(self, entry: QueueItem) -> Result<Attempt, SyncError> {
        match entry.event_data {
            QueueEventData::PricingChange { request } => self.apply_pricing(&request).await,
            QueueEventData::ItemChange { .. } => self.push_item(entry.item_id).await,
        }
    }

    async fn apply_pricing(&self, request: &PricingSyncRequest) -> Result<Attempt, SyncError> {
        match self.pricing.apply(request).await? {
            PricingOutcome::Updated {
                before,
                after,
                target,
                fields,
            } => Ok(Attempt::Done {
                sync_fields: Some(fields),
                before,
                after: Some(after),
                external_id: None,
                results: json!({ "outcome": "updated", "target": target }),
            }),
            PricingOutcome::Skipped { reason } => Ok(Attempt::Skipped { reason }),
        }
    }

    async fn push_item(&self, item_id: i64) -> Result<Attempt, SyncError> {
        let item = self
            .catalog
            .find_item(&self.db, item_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("catalog item {} not found", item_id)))?;

        if item.archived {
            return Ok(Attempt::Skipped {
                reason: "catalog item is archived".to_string(),
            });
        }

        let known_id = self
            .statuses
            .find(item_id)
            .await?
            .and_then(|status| status.netsuite_item_id);
        let request = ErpPushRequest::for_item(&item, known_id);

        if self.erp_dry_run {
            let payload = serde_json::to_value(&request)
                .map_err(|err| SyncError::unexpected(format!("payload encoding failed: {}", err)))?;
            let record = self
                .dry_runs
                .record(DryRunInput {
                    opms_item_id: Some(item.id),
                    opms_item_code: Some(item.code.clone()),
                    opms_product_id: Some(item.product_id),
                    sync_type: SYNC_TYPE_ITEM_PUSH.to_string(),
                    payload,
                    verdict: DryRunVerdict::Valid,
                    simulated_response: Some(json!({ "success": true, "dryRun": true })),
                })
                .await?;
            return Ok(Attempt::Done {
                sync_fields: Some(request.fields),
                before: None,
                after: None,
                external_id: None,
                results: json!({ "outcome": "dry_run", "dryRunId": record.id }),
            });
        }

        let erp = self
            .erp
            .as_ref()
            .ok_or_else(|| SyncError::permanent("ERP client is not configured"))?;
        let pushed = erp.push_item(&request).await?;

        Ok(Attempt::Done {
            sync_fields: Some(request.fields),
            before: None,
            after: None,
            external_id: Some(pushed.external_id.clone()),
            results: json!({
                "outcome": "pushed",
                "externalId": pushed.external_id,
                "response": pushed.response,
            }),
        })
    }
}

/// Queue-draining worker.
#[derive(Clone)]
pub struct JobDispatcher {
    queue: Arc<dyn SyncQueue>,
    jobs: SyncJobRepository,
    logs: JobLogRepository,
    statuses: ItemSyncStatusRepository,
    runner: AttemptRunner,
    config: DispatcherConfig,
    retry_policy: RetryPolicyConfig,
    worker_id: String,
}

impl JobDispatcher {
    pub fn new(
        config: &AppConfig,
        db: DatabaseConnection,
        queue: Arc<dyn SyncQueue>,
        catalog: Arc<dyn CatalogStore>,
        erp: Option<Arc<dyn ErpClient>>,
    ) -> Self {
        let statuses = ItemSyncStatusRepository::new(db.clone());
        let runner = AttemptRunner {
            db: db.clone(),
            catalog: catalog.clone(),
            pricing: PricingSyncEngine::new(db.clone(), catalog),
            erp,
            erp_dry_run: config.erp.dry_run,
            dry_runs: DryRunRecorder::new(DryRunRepository::new(db.clone())),
            statuses: statuses.clone(),
        };
        let worker_id = config
            .dispatcher
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));

        Self {
            queue,
            jobs: SyncJobRepository::new(db.clone()),
            logs: JobLogRepository::new(db),
            statuses,
            runner,
            config: config.dispatcher.clone(),
            retry_policy: config.retry_policy.clone(),
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Poll the queue every `tick_ms` until `shutdown` fires.
    #[instrument(skip_all, fields(worker_id = %self.worker_id))]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_ms = self.config.tick_ms,
            batch_size = self.config.batch_size,
            "Starting job dispatcher"
        );
        let tick_interval = Duration::from_millis(self.config.tick_ms);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Job dispatcher shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    match self.process_batch().await {
                        Ok(report) if report.claimed > 0 => debug!(?report, "Batch processed"),
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "Dispatcher tick failed"),
                    }
                }
            }
        }

        info!("Job dispatcher stopped");
    }

    /// Claim and process one batch.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn process_batch(&self) -> Result<BatchReport, SyncError> {
        let started = Instant::now();
        let batch = self
            .queue
            .get_next_batch(self.config.batch_size, &self.worker_id)
            .await?;

        if batch.is_empty() {
            return Ok(BatchReport::default());
        }

        let job_type = if batch.iter().all(|entry| entry.event_data.is_pricing()) {
            JobType::NsToOpmsPricing
        } else {
            JobType::Item
        };
        let job = self
            .jobs
            .create_job(NewSyncJob {
                job_type,
                total_items: Some(i32::try_from(batch.len()).unwrap_or(i32::MAX)),
                triggered_by: Some(self.worker_id.clone()),
                source: Some("queue".to_string()),
            })
            .await?;

        self.log(
            job.id,
            None,
            LogLevel::Info,
            "Batch claimed",
            Some(json!({ "entries": batch.len(), "workerId": self.worker_id })),
        )
        .await;

        let mut report = BatchReport {
            job_id: Some(job.id),
            claimed: batch.len(),
            ..BatchReport::default()
        };
        let mut first_permanent: Option<String> = None;

        for entry in batch {
            let queue_id = entry.id;
            match self.process_entry(job.id, entry).await {
                Ok(outcome) => {
                    counter!("sync_items_processed_total", "outcome" => outcome.label())
                        .increment(1);
                    match outcome {
                        ItemOutcome::Success => report.succeeded += 1,
                        ItemOutcome::Skipped(_) => report.skipped += 1,
                        ItemOutcome::FailedRetryable(_) => report.retried += 1,
                        ItemOutcome::FailedPermanent(err) => {
                            report.failed += 1;
                            first_permanent.get_or_insert(err.to_string());
                        }
                    }
                }
                // Bookkeeping failed; the entry stays claimed until the stale sweep releases it.
                Err(err) => {
                    error!(queue_id = %queue_id, error = %err, "Failed to record queue entry outcome");
                    counter!("sync_items_processed_total", "outcome" => "error").increment(1);
                }
            }
        }

        let permanent = first_permanent.is_some();
        self.jobs
            .finish_job(job.id, permanent, first_permanent)
            .await?;

        histogram!("sync_batch_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        info!(
            job_id = %job.id,
            claimed = report.claimed,
            succeeded = report.succeeded,
            skipped = report.skipped,
            retried = report.retried,
            failed = report.failed,
            "Batch finished"
        );

        Ok(report)
    }

    async fn process_entry(
        &self,
        job_id: Uuid,
        entry: QueueItem,
    ) -> Result<ItemOutcome, SyncError> {
        let (pricing_data, netsuite_item_id) = match &entry.event_data {
            QueueEventData::PricingChange { request } => (
                serde_json::to_value(&request.fields).ok(),
                request.netsuite_item_id.clone(),
            ),
            QueueEventData::ItemChange { .. } => (None, None),
        };
        let item = self
            .jobs
            .add_item(
                job_id,
                NewSyncItem {
                    netsuite_item_id,
                    opms_item_id: Some(entry.item_id),
                    opms_product_id: entry.product_id,
                    item_code: entry.event_data.item_code().map(str::to_string),
                    pricing_data,
                    retry_count: entry.retry_count,
                    max_retries: entry.max_retries,
                    ..NewSyncItem::default()
                },
            )
            .await?;
        self.statuses.mark_in_progress(entry.item_id).await?;

        let runner = self.runner.clone();
        let task_entry = entry.clone();
        let result = match tokio::spawn(runner.run(task_entry)).await {
            Ok(result) => result,
            Err(join_err) => {
                error!(queue_id = %entry.id, error = %join_err, "Sync attempt aborted");
                Err(SyncError::unexpected(format!("sync attempt aborted: {}", join_err)))
            }
        };

        self.settle(job_id, &item, &entry, result).await
    }

    /// Write the attempt's outcome everywhere it is tracked.
    async fn settle(
        &self,
        job_id: Uuid,
        item: &sync_item::Model,
        entry: &QueueItem,
        result: Result<Attempt, SyncError>,
    ) -> Result<ItemOutcome, SyncError> {
        let outcome = match result {
            Ok(Attempt::Done {
                sync_fields,
                before,
                after,
                external_id,
                results,
            }) => {
                self.jobs
                    .complete_item(
                        item.id,
                        ItemCompletion {
                            sync_fields,
                            pricing_before: before,
                            pricing_after: after,
                            netsuite_internal_id: external_id.clone(),
                            ..ItemCompletion::success()
                        },
                    )
                    .await?;
                self.statuses
                    .record_result(entry.item_id, AttemptResult::success(external_id))
                    .await?;
                self.log(job_id, Some(item.id), LogLevel::Info, "Item synced", Some(results.clone()))
                    .await;
                self.queue_update(job_id, item.id, entry, QueueStatus::Completed, StatusUpdate {
                    processing_results: Some(results),
                    ..StatusUpdate::default()
                })
                .await?;
                ItemOutcome::Success
            }
            Ok(Attempt::Skipped { reason }) => {
                self.jobs
                    .complete_item(item.id, ItemCompletion::skipped(reason.clone()))
                    .await?;
                self.statuses
                    .record_result(
                        entry.item_id,
                        AttemptResult {
                            field_validation_results: Some(json!({ "skipped": reason })),
                            ..AttemptResult::success(None)
                        },
                    )
                    .await?;
                self.log(
                    job_id,
                    Some(item.id),
                    LogLevel::Info,
                    "Item skipped",
                    Some(json!({ "reason": reason })),
                )
                .await;
                self.queue_update(job_id, item.id, entry, QueueStatus::Completed, StatusUpdate {
                    processing_results: Some(json!({ "outcome": "skipped", "reason": reason })),
                    ..StatusUpdate::default()
                })
                .await?;
                ItemOutcome::Skipped(reason)
            }
            Err(err) => {
                let retry = err.is_retryable() && entry.can_retry();
                self.jobs
                    .complete_item(item.id, ItemCompletion::failed(err.to_string()))
                    .await?;
                self.statuses
                    .record_result(entry.item_id, AttemptResult::failed(err.to_string()))
                    .await?;

                let context = json!({
                    "error": err,
                    "retryCount": entry.retry_count,
                    "maxRetries": entry.max_retries,
                });

                if retry {
                    let delay = retry_delay(&self.retry_policy, entry.retry_count, err.retry_after_secs());
                    warn!(
                        queue_id = %entry.id,
                        retry_count = entry.retry_count + 1,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "Sync attempt failed; retry scheduled"
                    );
                    self.log(job_id, Some(item.id), LogLevel::Warn, "Retry scheduled", Some(context))
                        .await;
                    let written = self
                        .queue
                        .schedule_retry(
                            entry.id,
                            claim(entry),
                            delay,
                            RetryUpdate {
                                retry_count: entry.retry_count + 1,
                                last_error: err.to_string(),
                            },
                        )
                        .await;
                    self.fenced(job_id, item.id, entry, written).await?;
                    ItemOutcome::FailedRetryable(err)
                } else {
                    error!(queue_id = %entry.id, code = err.code(), error = %err, "Sync attempt failed permanently");
                    self.log(job_id, Some(item.id), LogLevel::Error, "Item failed", Some(context))
                        .await;
                    self.queue_update(job_id, item.id, entry, QueueStatus::Failed, StatusUpdate {
                        error_message: Some(err.to_string()),
                        processing_results: Some(json!({ "outcome": "failed", "code": err.code() })),
                        ..StatusUpdate::default()
                    })
                    .await?;
                    ItemOutcome::FailedPermanent(err)
                }
            }
        };

        let item_status = match &outcome {
            ItemOutcome::Success => ItemStatus::Success,
            ItemOutcome::Skipped(_) => ItemStatus::Skipped,
            ItemOutcome::FailedRetryable(_) | ItemOutcome::FailedPermanent(_) => ItemStatus::Failed,
        };
        self.jobs.record_item_outcome(job_id, item_status).await?;

        Ok(outcome)
    }

    async fn queue_update(
        &self,
        job_id: Uuid,
        item_id: Uuid,
        entry: &QueueItem,
        status: QueueStatus,
        update: StatusUpdate,
    ) -> Result<(), SyncError> {
        let written = self
            .queue
            .update_status(entry.id, claim(entry), status, update)
            .await;
        self.fenced(job_id, item_id, entry, written).await
    }

    /// A lost claim means another worker owns the entry now; the queue row is
    /// left to that worker.
    async fn fenced(
        &self,
        job_id: Uuid,
        item_id: Uuid,
        entry: &QueueItem,
        written: Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        match written {
            Err(err) if err.is_lease_lost() => {
                warn!(queue_id = %entry.id, error = %err, "Queue claim lost; outcome not written back");
                counter!("sync_queue_lease_lost_total").increment(1);
                self.log(
                    job_id,
                    Some(item_id),
                    LogLevel::Warn,
                    "Queue claim lost",
                    Some(json!({ "queueId": entry.id, "claimedBy": entry.claimed_by })),
                )
                .await;
                Ok(())
            }
            other => other,
        }
    }

    /// Job log writes never fail the item they describe.
    async fn log(
        &self,
        job_id: Uuid,
        item_id: Option<Uuid>,
        level: LogLevel,
        message: &str,
        context: Option<JsonValue>,
    ) {
        if let Err(err) = self.logs.append(job_id, item_id, level, message, context).await {
            warn!(job_id = %job_id, error = %err, "Failed to write job log");
        }
    }
}
