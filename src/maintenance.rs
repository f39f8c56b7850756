//! # Maintenance
//!
//! Periodic housekeeping: releases queue entries held by workers that went
//! away, fails jobs those workers left `running`, and purges queue entries,
//! jobs and dry runs past their retention.

use std::sync::Arc;

use metrics::{counter, histogram};
use serde::Serialize;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use crate::config::MaintenanceConfig;
use crate::error::SyncError;
use crate::queue::{ReclaimStats, SyncQueue};
use crate::repositories::{DryRunRepository, SyncJobRepository, sync_job::JobPurgeStats};

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub reclaimed: ReclaimStats,
    pub stale_jobs_failed: u64,
    pub queue_entries_deleted: u64,
    pub jobs_deleted: u64,
    pub job_items_deleted: u64,
    pub job_logs_deleted: u64,
    pub dry_runs_deleted: u64,
}

#[derive(Clone)]
pub struct Maintenance {
    queue: Arc<dyn SyncQueue>,
    jobs: SyncJobRepository,
    dry_runs: DryRunRepository,
    config: MaintenanceConfig,
}

impl Maintenance {
    pub fn new(
        queue: Arc<dyn SyncQueue>,
        jobs: SyncJobRepository,
        dry_runs: DryRunRepository,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            queue,
            jobs,
            dry_runs,
            config,
        }
    }

    /// Run a pass every `interval_seconds` until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_seconds = self.config.interval_seconds,
            "Starting maintenance loop"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Maintenance shutdown requested");
                    break;
                }
                _ = sleep(self.config.interval()) => {
                    if let Err(err) = self.run_once().await {
                        error!(error = %err, "Maintenance pass failed");
                    }
                }
            }
        }

        info!("Maintenance loop stopped");
    }

    /// One full pass. Steps run in order and the first failure stops the pass.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<MaintenanceReport, SyncError> {
        let started = Instant::now();

        let reclaimed = self.queue.reclaim_stale(self.config.stale_after()).await?;
        let stale_jobs_failed = self
            .jobs
            .fail_stale_running(self.config.stale_after())
            .await?;
        let queue_entries_deleted = self
            .queue
            .cleanup_old_jobs(self.config.queue_retention_days)
            .await?;
        let JobPurgeStats { jobs, items, logs } = self
            .jobs
            .purge_older_than(self.config.job_retention_days)
            .await?;
        let dry_runs_deleted = self
            .dry_runs
            .purge_older_than(self.config.dry_run_retention_days)
            .await?;

        let report = MaintenanceReport {
            reclaimed,
            stale_jobs_failed,
            queue_entries_deleted,
            jobs_deleted: jobs,
            job_items_deleted: items,
            job_logs_deleted: logs,
            dry_runs_deleted,
        };

        counter!("sync_queue_reclaimed_total").increment(reclaimed.requeued + reclaimed.failed);
        histogram!("sync_maintenance_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        info!(
            requeued = reclaimed.requeued,
            lease_failed = reclaimed.failed,
            stale_jobs_failed,
            queue_entries_deleted,
            jobs_deleted = jobs,
            dry_runs_deleted,
            "Maintenance pass completed"
        );

        Ok(report)
    }
}
