//! Two-document job assignment.
//!
//! The store cannot update a server and a job in one transaction, so the
//! association is written in two steps:
//!
//! 1. append the job id to the server's current jobs (idempotent)
//! 2. set the job's host reference, retried on transient errors
//!
//! If step 2 still fails, step 1 is compensated by removing the entry
//! again. A failed compensation is reported as `Inconsistent` and left for
//! the reconciler. After a successful reassignment the previous host's
//! entry is pruned.
//!
//! Two assignments of the same job can interleave: both append their
//! server entry, and the later host write wins. Each assignment re-reads
//! the job after step 2, and the loser removes its own entry and returns
//! `Conflict`. If the loser's re-read lands before the winner's write,
//! both entries survive and the reconciler removes the stale one.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use scribegrid_state::{JobPatch, ServerId};

use crate::epoch_secs;
use crate::error::{AssignmentError, SchedulerError, SchedulerResult};
use crate::retry::RetryPolicy;
use crate::stores::Stores;

/// Outcome of a successful assignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub job_id: String,
    pub server_id: ServerId,
    /// Host the job was moved away from, if any.
    pub previous_host: Option<ServerId>,
    /// Attempts the host-reference write needed.
    pub host_attempts: u32,
}

/// Writes the job↔server association on both documents.
#[derive(Clone)]
pub struct Assigner {
    stores: Stores,
    retry: RetryPolicy,
}

impl Assigner {
    pub fn new(stores: Stores, retry: RetryPolicy) -> Self {
        Self { stores, retry }
    }

    /// Associate `job_id` with `server_id` on both sides.
    ///
    /// `NotFound` if either document is absent, `Validation` if the job is
    /// already completed. A failure after step 1 surfaces as
    /// `SchedulerError::Assignment`.
    pub async fn assign(&self, job_id: &str, server_id: &str) -> SchedulerResult<Assignment> {
        let job = self
            .stores
            .get_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("job {job_id}")))?;
        if job.is_completed() {
            return Err(SchedulerError::Validation(format!(
                "job {job_id} is already completed"
            )));
        }
        let server = self
            .stores
            .get_server(server_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("server {server_id}")))?;
        let already_listed = server.current_jobs.iter().any(|j| j == job_id);

        self.stores.append_current_job(server_id, job_id).await?;
        debug!(%job_id, %server_id, "server entry written");

        let now = epoch_secs();
        let (result, attempts) = self
            .retry
            .retry("set_job_fields", || {
                self.stores.set_job_fields(job_id, JobPatch::host(server_id, now))
            })
            .await;

        if let Err(err) = result {
            return Err(self
                .compensate(job_id, server_id, already_listed, attempts, err)
                .await
                .into());
        }

        match self.stores.get_job(job_id).await {
            Ok(Some(current)) => {
                if let Some(winner) = current.host_id.filter(|h| h != server_id) {
                    self.withdraw(job_id, server_id).await;
                    return Err(SchedulerError::Conflict(format!(
                        "job {job_id} was concurrently assigned to server {winner}"
                    )));
                }
            }
            Ok(None) => {
                self.withdraw(job_id, server_id).await;
                return Err(SchedulerError::NotFound(format!("job {job_id}")));
            }
            Err(e) => warn!(%job_id, %server_id, error = %e, "failed to re-read assigned job"),
        }

        let previous_host = job.host_id.filter(|h| h != server_id);
        if let Some(prev) = &previous_host {
            match self.stores.remove_current_job(prev, job_id).await {
                Ok(removed) => debug!(%job_id, previous = %prev, removed, "previous host pruned"),
                Err(e) => warn!(%job_id, previous = %prev, error = %e, "failed to prune previous host"),
            }
        }

        info!(%job_id, %server_id, attempts, "job assigned");
        Ok(Assignment {
            job_id: job_id.to_string(),
            server_id: server_id.to_string(),
            previous_host,
            host_attempts: attempts,
        })
    }

    /// Drop this attempt's server entry after losing the job to another writer.
    async fn withdraw(&self, job_id: &str, server_id: &str) {
        match self.stores.remove_current_job(server_id, job_id).await {
            Ok(removed) => debug!(%job_id, %server_id, removed, "lost assignment race, entry withdrawn"),
            Err(e) => warn!(%job_id, %server_id, error = %e, "failed to withdraw server entry"),
        }
    }

    async fn compensate(
        &self,
        job_id: &str,
        server_id: &str,
        already_listed: bool,
        attempts: u32,
        cause: SchedulerError,
    ) -> AssignmentError {
        let reason = cause.to_string();
        if already_listed {
            warn!(%job_id, %server_id, error = %reason, "host update failed, server entry predates this attempt");
            return AssignmentError::RolledBack {
                job_id: job_id.to_string(),
                server_id: server_id.to_string(),
                attempts,
                reason,
            };
        }

        match self.stores.remove_current_job(server_id, job_id).await {
            Ok(_) => {
                warn!(%job_id, %server_id, attempts, error = %reason, "host update failed, server entry rolled back");
                AssignmentError::RolledBack {
                    job_id: job_id.to_string(),
                    server_id: server_id.to_string(),
                    attempts,
                    reason,
                }
            }
            Err(rollback_err) => {
                error!(
                    %job_id,
                    %server_id,
                    error = %reason,
                    rollback_error = %rollback_err,
                    "assignment left inconsistent, awaiting reconciliation"
                );
                AssignmentError::Inconsistent {
                    job_id: job_id.to_string(),
                    server_id: server_id.to_string(),
                    reason: format!("{reason}; rollback failed: {rollback_err}"),
                }
            }
        }
    }
}
