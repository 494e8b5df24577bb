//! Overdue-job sweeper.
//!
//! Marks every non-completed job whose estimated finish lies in the past
//! as `completed` and moves it from its host's current list to the
//! completed list. A job that cannot be decoded or updated is logged and
//! skipped; one bad record never stops the pass.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use scribegrid_state::{JobPatch, JobStatus};

use crate::epoch_secs;
use crate::error::SchedulerResult;
use crate::stores::Stores;

/// Counters from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Non-completed records visited.
    pub scanned: usize,
    /// Jobs moved to `completed`.
    pub promoted: usize,
    /// Records skipped because they could not be decoded or updated.
    pub failed: usize,
    /// Promoted jobs moved to their host's completed list.
    pub migrated: usize,
    /// Promoted jobs whose host list could not be updated.
    pub migration_failed: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    stores: Stores,
}

impl Sweeper {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Sweep against the current time.
    pub async fn sweep(&self) -> SchedulerResult<SweepReport> {
        self.sweep_at(epoch_secs()).await
    }

    /// Promote every job with `estimated_finish_at < now`.
    pub async fn sweep_at(&self, now: u64) -> SchedulerResult<SweepReport> {
        let cursor = self.stores.find_jobs_not_status(JobStatus::Completed).await?;
        let mut report = SweepReport::default();

        for record in cursor {
            report.scanned += 1;
            let job = match record {
                Ok(job) => job,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable job record");
                    report.failed += 1;
                    continue;
                }
            };
            if !job.is_overdue(now) {
                continue;
            }

            if let Err(e) = self
                .stores
                .set_job_fields(&job.id, JobPatch::status(JobStatus::Completed, now))
                .await
            {
                warn!(job_id = %job.id, error = %e, "failed to mark job completed");
                report.failed += 1;
                continue;
            }
            report.promoted += 1;
            debug!(job_id = %job.id, "job completed");

            let Some(host) = job.host_id.as_deref() else {
                continue;
            };
            match self.stores.complete_job(host, &job.id).await {
                Ok(true) => report.migrated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(job_id = %job.id, server_id = %host, error = %e, "failed to move job to completed list");
                    report.migration_failed += 1;
                }
            }
        }

        if report.promoted > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                promoted = report.promoted,
                failed = report.failed,
                migrated = report.migrated,
                "sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "sweeper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("sweeper shutting down");
                    break;
                }
            }
        }
    }
}
