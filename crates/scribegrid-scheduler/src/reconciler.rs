//! Repair pass for drift between server lists, job host references, and
//! user job lists.
//!
//! Partial failures (a rolled-back assignment whose rollback failed, a
//! timed-out write that landed late, a crash between two steps) can leave
//! the documents disagreeing. Each pass reads servers, then jobs, then
//! users, and fixes what it finds:
//!
//! - server entries naming jobs that no longer exist are removed
//! - server entries naming jobs hosted elsewhere are removed
//! - an unhosted job listed by a server is rolled forward onto the first
//!   server listing it; further listings are removed
//! - non-completed hosted jobs missing from their host's list are appended
//! - completed jobs still in a current list are moved to completed
//! - hosted jobs missing from their owner's list are linked
//! - user entries naming jobs that no longer exist are removed
//! - unfinished jobs with no host, no server listing, and no owner link
//!   are deleted once older than the skeleton TTL
//!
//! Every destructive repair re-reads the job first, so a job created or
//! moved after the snapshot was taken is left alone.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use scribegrid_state::{Job, JobPatch, Server};

use crate::epoch_secs;
use crate::error::SchedulerResult;
use crate::stores::Stores;

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub servers_scanned: usize,
    pub jobs_scanned: usize,
    pub users_scanned: usize,
    /// Server entries naming missing jobs.
    pub dangling_removed: usize,
    /// Server entries naming jobs hosted elsewhere, or duplicate listings.
    pub stale_removed: usize,
    /// Unhosted jobs whose host was set from a server listing.
    pub hosts_rolled_forward: usize,
    /// Host entries appended for hosted jobs missing from their host.
    pub host_entries_restored: usize,
    /// Completed jobs moved out of a current list.
    pub completed_migrated: usize,
    pub user_links_restored: usize,
    pub user_links_pruned: usize,
    /// Unplaced jobs older than the skeleton TTL that were deleted.
    pub skeletons_pruned: usize,
    /// Jobs whose host server does not exist.
    pub orphan_hosts: usize,
    /// Repairs that failed and were left for the next pass.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
enum Repair {
    Dangling,
    Stale,
    RolledForward,
    HostRestored,
    Completed,
}

impl ReconcileReport {
    fn record<T>(
        &mut self,
        repair: Repair,
        job_id: &str,
        server_id: &str,
        result: SchedulerResult<T>,
    ) {
        match result {
            Ok(_) => {
                debug!(%job_id, %server_id, ?repair, "server list repaired");
                *self.counter(repair) += 1;
            }
            Err(e) => {
                warn!(%job_id, %server_id, ?repair, error = %e, "repair failed");
                self.failed += 1;
            }
        }
    }

    fn counter(&mut self, repair: Repair) -> &mut usize {
        match repair {
            Repair::Dangling => &mut self.dangling_removed,
            Repair::Stale => &mut self.stale_removed,
            Repair::RolledForward => &mut self.hosts_rolled_forward,
            Repair::HostRestored => &mut self.host_entries_restored,
            Repair::Completed => &mut self.completed_migrated,
        }
    }

    /// Total number of documents changed.
    pub fn repairs(&self) -> usize {
        self.dangling_removed
            + self.stale_removed
            + self.hosts_rolled_forward
            + self.host_entries_restored
            + self.completed_migrated
            + self.user_links_restored
            + self.user_links_pruned
            + self.skeletons_pruned
    }
}

/// Age after which an unplaced, unlinked job is considered abandoned.
const DEFAULT_SKELETON_TTL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Reconciler {
    stores: Stores,
    skeleton_ttl: Duration,
}

impl Reconciler {
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            skeleton_ttl: DEFAULT_SKELETON_TTL,
        }
    }

    pub fn with_skeleton_ttl(mut self, ttl: Duration) -> Self {
        self.skeleton_ttl = ttl;
        self
    }

    /// Run one pass. Fails only if the initial snapshot cannot be read.
    pub async fn reconcile(&self) -> SchedulerResult<ReconcileReport> {
        let servers = self.stores.find_all_servers().await?;
        let jobs: HashMap<String, Job> = self
            .stores
            .list_jobs()
            .await?
            .into_iter()
            .map(|job| (job.id.clone(), job))
            .collect();
        let users = self.stores.list_users().await?;

        let mut report = ReconcileReport {
            servers_scanned: servers.len(),
            jobs_scanned: jobs.len(),
            users_scanned: users.len(),
            ..ReconcileReport::default()
        };

        // job id -> server its listing was kept on
        let mut kept: HashMap<String, String> = HashMap::new();
        for server in &servers {
            self.reconcile_server(server, &jobs, &mut kept, &mut report).await;
        }

        let known_servers: HashSet<&str> = servers.iter().map(|s| s.id.as_str()).collect();
        for job in jobs.values() {
            self.reconcile_host(job, &known_servers, &kept, &mut report).await;
        }

        let owners: HashMap<&str, &Vec<String>> =
            users.iter().map(|u| (u.id.as_str(), &u.jobs)).collect();
        for job in jobs.values() {
            let Some(listed) = owners.get(job.user_id.as_str()) else {
                continue;
            };
            if job.host_id.is_none() || listed.iter().any(|j| j == &job.id) {
                continue;
            }
            match self.stores.append_user_job(&job.user_id, &job.id).await {
                Ok(()) => {
                    debug!(job_id = %job.id, user_id = %job.user_id, "user link restored");
                    report.user_links_restored += 1;
                }
                Err(e) => {
                    warn!(job_id = %job.id, user_id = %job.user_id, error = %e, "failed to restore user link");
                    report.failed += 1;
                }
            }
        }

        let cutoff = epoch_secs().saturating_sub(self.skeleton_ttl.as_secs());
        for job in jobs.values() {
            let linked = owners
                .get(job.user_id.as_str())
                .is_some_and(|listed| listed.iter().any(|j| j == &job.id));
            if job.host_id.is_some()
                || job.is_completed()
                || linked
                || kept.contains_key(&job.id)
                || job.created_at > cutoff
            {
                continue;
            }
            self.prune_skeleton(&job.id, &mut report).await;
        }

        for user in &users {
            for job_id in user.jobs.iter().filter(|id| !jobs.contains_key(*id)) {
                if !self.job_missing(job_id).await {
                    continue;
                }
                match self.stores.remove_user_job(&user.id, job_id).await {
                    Ok(_) => {
                        debug!(%job_id, user_id = %user.id, "dangling user link pruned");
                        report.user_links_pruned += 1;
                    }
                    Err(e) => {
                        warn!(%job_id, user_id = %user.id, error = %e, "failed to prune user link");
                        report.failed += 1;
                    }
                }
            }
        }

        if report.repairs() > 0 || report.failed > 0 {
            info!(
                repairs = report.repairs(),
                failed = report.failed,
                orphan_hosts = report.orphan_hosts,
                "reconciliation finished"
            );
        }
        Ok(report)
    }

    async fn reconcile_server(
        &self,
        server: &Server,
        jobs: &HashMap<String, Job>,
        kept: &mut HashMap<String, String>,
        report: &mut ReconcileReport,
    ) {
        let sid = server.id.as_str();

        for job_id in &server.completed_jobs {
            if !jobs.contains_key(job_id) && self.job_missing(job_id).await {
                let result = self.stores.detach_job(sid, job_id).await;
                report.record(Repair::Dangling, job_id, sid, result);
            }
        }

        for job_id in &server.current_jobs {
            let Some(job) = jobs.get(job_id) else {
                if self.job_missing(job_id).await {
                    let result = self.stores.detach_job(sid, job_id).await;
                    report.record(Repair::Dangling, job_id, sid, result);
                }
                continue;
            };

            match job.host_id.as_deref() {
                Some(host) if host == sid => {
                    if job.is_completed() {
                        let result = self.stores.complete_job(sid, job_id).await;
                        report.record(Repair::Completed, job_id, sid, result);
                    } else {
                        kept.insert(job_id.clone(), sid.to_string());
                    }
                }
                Some(_) => {
                    if self.still_hosted_elsewhere(job_id, sid).await {
                        let result = self.stores.remove_current_job(sid, job_id).await;
                        report.record(Repair::Stale, job_id, sid, result);
                    }
                }
                None if job.is_completed() => {
                    let result = self.stores.complete_job(sid, job_id).await;
                    report.record(Repair::Completed, job_id, sid, result);
                }
                None => {
                    if kept.contains_key(job_id) {
                        let result = self.stores.remove_current_job(sid, job_id).await;
                        report.record(Repair::Stale, job_id, sid, result);
                        continue;
                    }
                    kept.insert(job_id.clone(), sid.to_string());
                    match self.stores.get_job(job_id).await {
                        Ok(Some(fresh)) if fresh.host_id.is_none() => {
                            let result = self
                                .stores
                                .set_job_fields(job_id, JobPatch::host(sid, epoch_secs()))
                                .await;
                            report.record(Repair::RolledForward, job_id, sid, result);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(%job_id, server_id = %sid, error = %e, "failed to re-read job");
                            report.failed += 1;
                        }
                    }
                }
            }
        }
    }

    async fn reconcile_host(
        &self,
        job: &Job,
        known_servers: &HashSet<&str>,
        kept: &HashMap<String, String>,
        report: &mut ReconcileReport,
    ) {
        if job.is_completed() {
            return;
        }
        let Some(host) = job.host_id.as_deref() else {
            return;
        };
        if !known_servers.contains(host) {
            warn!(job_id = %job.id, server_id = %host, "job hosted on unknown server");
            report.orphan_hosts += 1;
            return;
        }
        if kept.get(&job.id).is_some_and(|s| s == host) {
            return;
        }
        // The host may have been set after the server snapshot; only restore
        // the entry if the job still points there.
        match self.stores.get_job(&job.id).await {
            Ok(Some(fresh)) if fresh.host_id.as_deref() == Some(host) && !fresh.is_completed() => {
                let result = self.stores.append_current_job(host, &job.id).await;
                report.record(Repair::HostRestored, &job.id, host, result);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "failed to re-read job");
                report.failed += 1;
            }
        }
    }

    /// Delete an abandoned job if a fresh read still shows it unplaced.
    async fn prune_skeleton(&self, job_id: &str, report: &mut ReconcileReport) {
        match self.stores.get_job(job_id).await {
            Ok(Some(fresh)) if fresh.host_id.is_none() && !fresh.is_completed() => {}
            Ok(_) => return,
            Err(e) => {
                warn!(%job_id, error = %e, "failed to re-read job");
                report.failed += 1;
                return;
            }
        }
        match self.stores.delete_job(job_id).await {
            Ok(_) => {
                debug!(%job_id, "abandoned unplaced job deleted");
                report.skeletons_pruned += 1;
            }
            Err(e) => {
                warn!(%job_id, error = %e, "failed to delete abandoned job");
                report.failed += 1;
            }
        }
    }

    /// Whether the job is still absent on a fresh read. Read errors count as present.
    async fn job_missing(&self, job_id: &str) -> bool {
        matches!(self.stores.get_job(job_id).await, Ok(None))
    }

    async fn still_hosted_elsewhere(&self, job_id: &str, server_id: &str) -> bool {
        match self.stores.get_job(job_id).await {
            Ok(Some(job)) => job.host_id.as_deref().is_some_and(|h| h != server_id),
            _ => false,
        }
    }

    /// Reconcile every `interval` until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "reconciler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.reconcile().await {
                        tracing::error!(error = %e, "reconciliation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    }
}
