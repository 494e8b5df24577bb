//! Job lifecycle coordination.
//!
//! `JobOrchestrator` is the use-case layer above the balancer, assigner,
//! and sweeper. Submission runs in this order:
//!
//! 1. validate the request and check the owner exists
//! 2. select a target among the placement candidates
//! 3. insert the job skeleton (`pending`, no host)
//! 4. assign it to the target on both documents
//! 5. append it to the owner's job list
//!
//! A failed assignment deletes the skeleton again. A failed owner update
//! leaves the placed job in place and returns `UserLink`, which carries
//! the job so the caller can retry the link alone.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scribegrid_state::{Job, JobPatch, JobStatus, Server};

use crate::assigner::{Assigner, Assignment};
use crate::config::{SchedulerConfig, SweeperConfig};
use crate::epoch_secs;
use crate::error::{AssignmentError, SchedulerError, SchedulerResult};
use crate::load_balancer::LeastLoadedBalancer;
use crate::stores::Stores;
use crate::sweeper::Sweeper;

/// Client-supplied fields of a new job. Every field is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobSpec {
    pub title: String,
    pub source_language: String,
    pub file_format: String,
    pub description: String,
    pub input_file: String,
    pub output_file: String,
}

impl JobSpec {
    /// `Validation` naming every empty field.
    pub fn validate(&self) -> SchedulerResult<()> {
        let fields = [
            ("title", &self.title),
            ("source_language", &self.source_language),
            ("file_format", &self.file_format),
            ("description", &self.description),
            ("input_file", &self.input_file),
            ("output_file", &self.output_file),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SchedulerError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }

    fn into_job(self, id: String, user_id: &str, now: u64, duration_secs: u64) -> Job {
        Job {
            id,
            user_id: user_id.to_string(),
            title: self.title,
            status: JobStatus::Pending,
            source_language: self.source_language,
            file_format: self.file_format,
            description: self.description,
            input_file: self.input_file,
            output_file: self.output_file,
            host_id: None,
            created_at: now,
            updated_at: now,
            estimated_finish_at: now.saturating_add(duration_secs),
        }
    }
}

/// Coordinates placement, assignment, and owner bookkeeping for jobs.
pub struct JobOrchestrator {
    stores: Stores,
    config: SchedulerConfig,
    sweeper_config: SweeperConfig,
    balancer: LeastLoadedBalancer,
    assigner: Assigner,
    sweeper: Sweeper,
}

impl JobOrchestrator {
    pub fn new(stores: Stores, config: SchedulerConfig, sweeper_config: SweeperConfig) -> Self {
        let stores = stores.with_timeout(config.store_timeout());
        Self {
            balancer: LeastLoadedBalancer::new(config.placement),
            assigner: Assigner::new(stores.clone(), config.assign_retry.clone()),
            sweeper: Sweeper::new(stores.clone()),
            stores,
            config,
            sweeper_config,
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn balancer(&self) -> &LeastLoadedBalancer {
        &self.balancer
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    /// Pick the target server for a new job.
    pub async fn place(&self) -> SchedulerResult<Server> {
        let servers = self.stores.find_all_servers().await?;
        let total = servers.len();
        let candidates = self.balancer.candidates(servers);
        debug!(total, candidates = candidates.len(), "placement candidates");
        let target = self.balancer.select(&candidates)?;
        Ok(target.clone())
    }

    /// Create, place, and link a new job for `user_id`.
    pub async fn submit_job(&self, user_id: &str, spec: JobSpec) -> SchedulerResult<Job> {
        spec.validate()?;
        if self.stores.get_user(user_id).await?.is_none() {
            return Err(SchedulerError::NotFound(format!("user {user_id}")));
        }

        let target = self.place().await?;

        let now = epoch_secs();
        let mut job = spec.into_job(
            Uuid::new_v4().to_string(),
            user_id,
            now,
            self.config.job_duration_secs,
        );
        self.stores.insert_job(&job).await?;

        match self.assigner.assign(&job.id, &target.id).await {
            Ok(assignment) => job.host_id = Some(assignment.server_id),
            // The server still lists the job; the reconciler rolls it forward.
            Err(e @ SchedulerError::Assignment(AssignmentError::Inconsistent { .. })) => {
                warn!(job_id = %job.id, server_id = %target.id, "unplaced job kept for reconciliation");
                return Err(e);
            }
            Err(e) => {
                self.discard_skeleton(&job.id).await;
                return Err(e);
            }
        }

        if let Err(e) = self.stores.append_user_job(user_id, &job.id).await {
            error!(job_id = %job.id, %user_id, error = %e, "job placed but owner link failed");
            return Err(SchedulerError::UserLink {
                job: Box::new(job),
                source: Box::new(e),
            });
        }

        info!(job_id = %job.id, %user_id, server_id = %target.id, "job submitted");
        Ok(job)
    }

    async fn discard_skeleton(&self, job_id: &str) {
        match self.stores.delete_job(job_id).await {
            Ok(_) => debug!(%job_id, "unplaced job removed"),
            Err(e) => warn!(%job_id, error = %e, "failed to remove unplaced job"),
        }
    }

    /// Append an existing job to its owner's list. Retries a failed `UserLink`.
    pub async fn link_user_job(&self, user_id: &str, job_id: &str) -> SchedulerResult<Job> {
        let job = self
            .stores
            .get_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("job {job_id}")))?;
        if job.user_id != user_id {
            return Err(SchedulerError::Validation(format!(
                "job {job_id} belongs to user {}",
                job.user_id
            )));
        }
        self.stores.append_user_job(user_id, job_id).await?;
        debug!(%job_id, %user_id, "job linked to owner");
        Ok(job)
    }

    /// Move an existing job onto `server_id`.
    pub async fn attach_job(&self, server_id: &str, job_id: &str) -> SchedulerResult<Assignment> {
        self.assigner.assign(job_id, server_id).await
    }

    /// Apply a client patch to a job.
    ///
    /// A status patch on a hosted job keeps the host lists in step: marking
    /// it `completed` moves it to the completed list, any other status moves
    /// it back to the current list. A failure there is logged and left to
    /// the reconciler.
    pub async fn update_job(&self, job_id: &str, patch: JobPatch) -> SchedulerResult<Job> {
        if patch.is_empty() {
            return Err(SchedulerError::Validation("no fields to update".to_string()));
        }
        let status_changed = patch.status.is_some();
        let job = self.stores.set_job_fields(job_id, patch).await?;
        let Some(host) = job.host_id.as_deref().filter(|_| status_changed) else {
            return Ok(job);
        };
        let moved = if job.is_completed() {
            self.stores.complete_job(host, job_id).await
        } else {
            self.stores.reopen_job(host, job_id).await
        };
        match moved {
            Ok(true) => debug!(%job_id, server_id = %host, status = %job.status, "host lists updated"),
            Ok(false) => {}
            Err(e) => {
                warn!(%job_id, server_id = %host, error = %e, "failed to update host job lists")
            }
        }
        Ok(job)
    }

    /// Delete a user's job and every reference to it.
    ///
    /// The host lists are cleaned first, then the job document, then the
    /// owner's list. A job id the user lists but which no longer exists is
    /// simply unlinked.
    pub async fn delete_user_job(&self, user_id: &str, job_id: &str) -> SchedulerResult<()> {
        let user = self
            .stores
            .get_user(user_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("user {user_id}")))?;
        let listed = user.jobs.iter().any(|j| j == job_id);

        let Some(job) = self.stores.get_job(job_id).await? else {
            if listed {
                self.stores.remove_user_job(user_id, job_id).await?;
                debug!(%job_id, %user_id, "dangling job unlinked");
                return Ok(());
            }
            return Err(SchedulerError::NotFound(format!("job {job_id}")));
        };
        if job.user_id != user_id && !listed {
            return Err(SchedulerError::NotFound(format!(
                "job {job_id} for user {user_id}"
            )));
        }

        if let Some(host) = &job.host_id {
            match self.stores.detach_job(host, job_id).await {
                Ok(_) | Err(SchedulerError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.stores.delete_job(job_id).await?;
        self.stores.remove_user_job(user_id, job_id).await?;

        info!(%job_id, %user_id, "job deleted");
        Ok(())
    }

    /// The user's jobs in list order, swept first when `sweep_on_read` is set.
    pub async fn list_user_jobs(&self, user_id: &str) -> SchedulerResult<Vec<Job>> {
        if self.sweeper_config.sweep_on_read {
            self.sweeper.sweep().await?;
        }
        let user = self
            .stores
            .get_user(user_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("user {user_id}")))?;

        let mut jobs = Vec::with_capacity(user.jobs.len());
        for job_id in &user.jobs {
            match self.stores.get_job(job_id).await? {
                Some(job) => jobs.push(job),
                None => debug!(%job_id, %user_id, "skipping dangling job reference"),
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use scribegrid_state::UserStore;

    use super::*;
    use crate::load_balancer::PlacementPolicy;
    use crate::testing::{FaultyStore, fast_config, job, server, user};

    fn spec() -> JobSpec {
        JobSpec {
            title: "Board meeting".to_string(),
            source_language: "de".to_string(),
            file_format: "wav".to_string(),
            description: "translate to english".to_string(),
            input_file: "in/meeting.wav".to_string(),
            output_file: "out/meeting.txt".to_string(),
        }
    }

    fn orchestrator(faulty: &Arc<FaultyStore>) -> JobOrchestrator {
        JobOrchestrator::new(faulty.stores(), fast_config(), SweeperConfig::default())
    }

    fn with_fleet(servers: &[Server]) -> Arc<FaultyStore> {
        let faulty = FaultyStore::new();
        faulty.inner().put_user(&user("user-1")).unwrap();
        for s in servers {
            faulty.inner().put_server(s).unwrap();
        }
        faulty
    }

    #[tokio::test]
    async fn empty_fields_are_rejected_without_side_effects() {
        let faulty = with_fleet(&[server("srv-1", 0, "active")]);
        let orch = orchestrator(&faulty);

        let err = orch
            .submit_job("user-1", JobSpec::default())
            .await
            .unwrap_err();
        match err {
            SchedulerError::Validation(msg) => {
                assert!(msg.contains("title"));
                assert!(msg.contains("output_file"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        assert!(faulty.inner().list_jobs().unwrap().is_empty());
        assert!(faulty.inner().get_server("srv-1").unwrap().unwrap().current_jobs.is_empty());
        assert_eq!(faulty.calls("find_all_servers"), 0);
    }

    #[tokio::test]
    async fn empty_registry_is_no_candidates() {
        let faulty = with_fleet(&[]);
        let orch = orchestrator(&faulty);

        let err = orch.submit_job("user-1", spec()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoCandidates));
        assert!(faulty.inner().list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inactive_servers_are_not_candidates() {
        let faulty = with_fleet(&[server("srv-1", 0, "inactive")]);
        let orch = orchestrator(&faulty);

        let err = orch.submit_job("user-1", spec()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoCandidates));
    }

    #[tokio::test]
    async fn status_blind_policy_places_on_inactive_server() {
        let faulty = with_fleet(&[server("srv-1", 0, "inactive")]);
        let config = SchedulerConfig {
            placement: PlacementPolicy::StatusBlind,
            ..fast_config()
        };
        let orch = JobOrchestrator::new(faulty.stores(), config, SweeperConfig::default());
        assert_eq!(orch.balancer().policy(), PlacementPolicy::StatusBlind);

        let job = orch.submit_job("user-1", spec()).await.unwrap();
        assert_eq!(job.host_id.as_deref(), Some("srv-1"));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let faulty = with_fleet(&[server("srv-1", 0, "active")]);
        let orch = orchestrator(&faulty);

        let err = orch.submit_job("ghost", spec()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
        assert!(faulty.inner().list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn submitted_job_is_placed_and_linked() {
        let faulty = with_fleet(&[server("busy", 2, "active"), server("idle", 0, "active")]);
        let orch = orchestrator(&faulty);

        let created = orch.submit_job("user-1", spec()).await.unwrap();
        assert_eq!(created.status, JobStatus::Pending);
        assert_eq!(created.host_id.as_deref(), Some("idle"));
        assert_eq!(created.estimated_finish_at, created.created_at + 30);

        let stored = faulty.inner().get_job(&created.id).unwrap().unwrap();
        assert_eq!(stored.host_id.as_deref(), Some("idle"));
        let idle = faulty.inner().get_server("idle").unwrap().unwrap();
        assert_eq!(idle.current_jobs, vec![created.id.clone()]);
        let owner = faulty.inner().get_user("user-1").unwrap().unwrap();
        assert_eq!(owner.jobs, vec![created.id]);
    }

    #[tokio::test]
    async fn sequential_submissions_spread_evenly() {
        let faulty = with_fleet(&[
            server("a", 0, "active"),
            server("b", 0, "active"),
            server("c", 0, "active"),
        ]);
        let orch = orchestrator(&faulty);

        for _ in 0..6 {
            orch.submit_job("user-1", spec()).await.unwrap();
        }
        for id in ["a", "b", "c"] {
            assert_eq!(faulty.inner().get_server(id).unwrap().unwrap().load(), 2);
        }
    }

    #[tokio::test]
    async fn failed_assignment_removes_skeleton() {
        let faulty = with_fleet(&[server("srv-1", 0, "active")]);
        faulty.fail_always("set_job_fields");
        let orch = orchestrator(&faulty);

        let err = orch.submit_job("user-1", spec()).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Assignment(AssignmentError::RolledBack { .. })
        ));
        assert!(faulty.inner().list_jobs().unwrap().is_empty());
        assert!(faulty.inner().get_server("srv-1").unwrap().unwrap().current_jobs.is_empty());
        assert!(faulty.inner().get_user("user-1").unwrap().unwrap().jobs.is_empty());
    }

    #[tokio::test]
    async fn inconsistent_assignment_keeps_job_for_reconciler() {
        let faulty = with_fleet(&[server("srv-1", 0, "active")]);
        faulty.fail_always("set_job_fields");
        faulty.fail_always("remove_current_job");
        let orch = orchestrator(&faulty);

        let err = orch.submit_job("user-1", spec()).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Assignment(AssignmentError::Inconsistent { .. })
        ));
        assert_eq!(faulty.calls("delete_job"), 0);
        let jobs = faulty.inner().list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        let job_id = jobs[0].id.clone();

        faulty.heal("set_job_fields");
        faulty.heal("remove_current_job");
        let reconciler = crate::reconciler::Reconciler::new(faulty.stores());
        reconciler.reconcile().await.unwrap();
        reconciler.reconcile().await.unwrap();

        let job = faulty.inner().get_job(&job_id).unwrap().unwrap();
        assert_eq!(job.host_id.as_deref(), Some("srv-1"));
        assert_eq!(
            faulty.inner().get_user("user-1").unwrap().unwrap().jobs,
            vec![job_id]
        );
    }

    #[tokio::test]
    async fn user_link_failure_keeps_job_and_can_be_retried() {
        let faulty = with_fleet(&[server("srv-1", 0, "active")]);
        faulty.fail("append_user_job", 1);
        let orch = orchestrator(&faulty);

        let err = orch.submit_job("user-1", spec()).await.unwrap_err();
        let SchedulerError::UserLink { job, .. } = err else {
            panic!("expected user link error");
        };
        assert_eq!(job.host_id.as_deref(), Some("srv-1"));
        assert!(faulty.inner().get_job(&job.id).unwrap().is_some());
        assert!(faulty.inner().get_user("user-1").unwrap().unwrap().jobs.is_empty());

        orch.link_user_job("user-1", &job.id).await.unwrap();
        assert_eq!(
            faulty.inner().get_user("user-1").unwrap().unwrap().jobs,
            vec![job.id.clone()]
        );
        // Still exactly one placement.
        assert_eq!(faulty.inner().get_server("srv-1").unwrap().unwrap().load(), 1);
    }

    #[tokio::test]
    async fn link_rejects_foreign_job() {
        let faulty = with_fleet(&[]);
        faulty
            .inner()
            .insert_job(&job("theirs", "user-2", JobStatus::Pending, 0))
            .unwrap();
        let orch = orchestrator(&faulty);

        let err = orch.link_user_job("user-1", "theirs").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn stalled_store_times_out() {
        let faulty = with_fleet(&[server("srv-1", 0, "active")]);
        faulty.stall("find_all_servers", Duration::from_millis(300));
        let config = SchedulerConfig {
            store_timeout_ms: 20,
            ..fast_config()
        };
        let orch = JobOrchestrator::new(faulty.stores(), config, SweeperConfig::default());

        let err = orch.submit_job("user-1", spec()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout { .. }));
        assert!(faulty.inner().list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_cleans_host_and_owner() {
        let faulty = with_fleet(&[server("srv-1", 0, "active")]);
        let orch = orchestrator(&faulty);
        let created = orch.submit_job("user-1", spec()).await.unwrap();

        orch.delete_user_job("user-1", &created.id).await.unwrap();

        assert!(faulty.inner().get_job(&created.id).unwrap().is_none());
        assert!(!faulty.inner().get_server("srv-1").unwrap().unwrap().references(&created.id));
        assert!(faulty.inner().get_user("user-1").unwrap().unwrap().jobs.is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_job_is_not_found_but_dangling_link_is_removed() {
        let faulty = with_fleet(&[]);
        faulty.inner().append_user_job("user-1", "gone").unwrap();
        let orch = orchestrator(&faulty);

        let err = orch.delete_user_job("user-1", "never").await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));

        orch.delete_user_job("user-1", "gone").await.unwrap();
        assert!(faulty.inner().get_user("user-1").unwrap().unwrap().jobs.is_empty());
    }

    #[tokio::test]
    async fn completing_a_job_by_patch_migrates_it() {
        let faulty = with_fleet(&[server("srv-1", 0, "active")]);
        let orch = orchestrator(&faulty);
        let created = orch.submit_job("user-1", spec()).await.unwrap();

        let patch = JobPatch {
            status: Some(JobStatus::Completed),
            ..JobPatch::default()
        };
        let updated = orch.update_job(&created.id, patch).await.unwrap();
        assert!(updated.is_completed());

        let srv = faulty.inner().get_server("srv-1").unwrap().unwrap();
        assert!(srv.current_jobs.is_empty());
        assert_eq!(srv.completed_jobs, vec![created.id]);

        let err = orch.update_job("srv-1", JobPatch::default()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn reopening_a_completed_job_restores_host_entry() {
        let faulty = with_fleet(&[server("srv-1", 0, "active")]);
        let orch = orchestrator(&faulty);
        let created = orch.submit_job("user-1", spec()).await.unwrap();

        orch.update_job(&created.id, JobPatch::status(JobStatus::Completed, 0))
            .await
            .unwrap();
        let reopened = JobPatch {
            status: Some(JobStatus::Pending),
            ..JobPatch::default()
        };
        let updated = orch.update_job(&created.id, reopened).await.unwrap();
        assert_eq!(updated.status, JobStatus::Pending);
        assert_eq!(updated.host_id.as_deref(), Some("srv-1"));

        let srv = faulty.inner().get_server("srv-1").unwrap().unwrap();
        assert_eq!(srv.current_jobs, vec![created.id.clone()]);
        assert!(srv.completed_jobs.is_empty());
        assert_eq!(srv.load(), 1);

        // Patches that leave the status alone do not touch the host lists.
        let retitled = JobPatch {
            title: Some("renamed".to_string()),
            ..JobPatch::default()
        };
        orch.update_job(&created.id, retitled).await.unwrap();
        assert_eq!(faulty.calls("reopen_job"), 1);
    }

    #[tokio::test]
    async fn listing_sweeps_overdue_jobs_first() {
        let faulty = with_fleet(&[]);
        faulty
            .inner()
            .insert_job(&job("old", "user-1", JobStatus::Pending, 1))
            .unwrap();
        faulty.inner().append_user_job("user-1", "old").unwrap();
        faulty.inner().append_user_job("user-1", "dangling").unwrap();
        let orch = orchestrator(&faulty);

        let jobs = orch.list_user_jobs("user-1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn listing_without_sweep_on_read_leaves_status() {
        let faulty = with_fleet(&[]);
        faulty
            .inner()
            .insert_job(&job("old", "user-1", JobStatus::Pending, 1))
            .unwrap();
        faulty.inner().append_user_job("user-1", "old").unwrap();
        let orch = JobOrchestrator::new(
            faulty.stores(),
            fast_config(),
            SweeperConfig {
                sweep_on_read: false,
                ..SweeperConfig::default()
            },
        );

        let jobs = orch.list_user_jobs("user-1").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Pending);
    }
}
