//! Store handles with a per-call deadline.
//!
//! `Stores` bundles the three collaborator interfaces and runs every call
//! on the blocking pool under `tokio::time::timeout`. An expired deadline
//! becomes `SchedulerError::Timeout`; a store call that panics becomes
//! `SchedulerError::Persistence`. Neither takes the process down.
//!
//! A timed-out write may still land after the caller gave up. The
//! reconciler repairs whatever half-state that leaves behind.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use scribegrid_state::*;

use crate::error::{SchedulerError, SchedulerResult};

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

/// Injected store access for the scheduler, sweeper, orchestrator, and reconciler.
#[derive(Clone)]
pub struct Stores {
    servers: Arc<dyn ServerRegistry>,
    jobs: Arc<dyn JobStore>,
    users: Arc<dyn UserStore>,
    timeout: Duration,
}

impl Stores {
    pub fn new(
        servers: Arc<dyn ServerRegistry>,
        jobs: Arc<dyn JobStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            servers,
            jobs,
            users,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Use one `StateStore` for all three roles.
    pub fn from_state(state: StateStore) -> Self {
        let state = Arc::new(state);
        Self::new(state.clone(), state.clone(), state)
    }

    /// Set the deadline applied to each store call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run<T, F>(&self, operation: &'static str, f: F) -> SchedulerResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StateResult<T> + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(f);
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result.map_err(SchedulerError::from),
            Ok(Err(join_err)) => Err(SchedulerError::Persistence(StateError::Transaction(
                format!("{operation} aborted: {join_err}"),
            ))),
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "store operation timed out"
                );
                Err(SchedulerError::Timeout {
                    operation,
                    timeout: self.timeout,
                })
            }
        }
    }

    // ── Servers ────────────────────────────────────────────────────

    pub async fn find_all_servers(&self) -> SchedulerResult<Vec<Server>> {
        let servers = self.servers.clone();
        self.run("find_all_servers", move || servers.find_all_servers())
            .await
    }

    pub async fn get_server(&self, server_id: &str) -> SchedulerResult<Option<Server>> {
        let servers = self.servers.clone();
        let server_id = server_id.to_string();
        self.run("get_server", move || servers.get_server(&server_id))
            .await
    }

    pub async fn append_current_job(&self, server_id: &str, job_id: &str) -> SchedulerResult<()> {
        let servers = self.servers.clone();
        let (server_id, job_id) = (server_id.to_string(), job_id.to_string());
        self.run("append_current_job", move || {
            servers.append_current_job(&server_id, &job_id)
        })
        .await
    }

    pub async fn remove_current_job(&self, server_id: &str, job_id: &str) -> SchedulerResult<bool> {
        let servers = self.servers.clone();
        let (server_id, job_id) = (server_id.to_string(), job_id.to_string());
        self.run("remove_current_job", move || {
            servers.remove_current_job(&server_id, &job_id)
        })
        .await
    }

    pub async fn complete_job(&self, server_id: &str, job_id: &str) -> SchedulerResult<bool> {
        let servers = self.servers.clone();
        let (server_id, job_id) = (server_id.to_string(), job_id.to_string());
        self.run("complete_job", move || servers.complete_job(&server_id, &job_id))
            .await
    }

    pub async fn reopen_job(&self, server_id: &str, job_id: &str) -> SchedulerResult<bool> {
        let servers = self.servers.clone();
        let (server_id, job_id) = (server_id.to_string(), job_id.to_string());
        self.run("reopen_job", move || servers.reopen_job(&server_id, &job_id))
            .await
    }

    pub async fn detach_job(&self, server_id: &str, job_id: &str) -> SchedulerResult<bool> {
        let servers = self.servers.clone();
        let (server_id, job_id) = (server_id.to_string(), job_id.to_string());
        self.run("detach_job", move || servers.detach_job(&server_id, &job_id))
            .await
    }

    // ── Jobs ───────────────────────────────────────────────────────

    pub async fn find_jobs_not_status(&self, status: JobStatus) -> SchedulerResult<JobCursor> {
        let jobs = self.jobs.clone();
        self.run("find_jobs_not_status", move || jobs.find_jobs_not_status(status))
            .await
    }

    pub async fn get_job(&self, job_id: &str) -> SchedulerResult<Option<Job>> {
        let jobs = self.jobs.clone();
        let job_id = job_id.to_string();
        self.run("get_job", move || jobs.get_job(&job_id)).await
    }

    pub async fn list_jobs(&self) -> SchedulerResult<Vec<Job>> {
        let jobs = self.jobs.clone();
        self.run("list_jobs", move || jobs.list_jobs()).await
    }

    pub async fn insert_job(&self, job: &Job) -> SchedulerResult<()> {
        let jobs = self.jobs.clone();
        let job = job.clone();
        self.run("insert_job", move || jobs.insert_job(&job)).await
    }

    pub async fn set_job_fields(&self, job_id: &str, fields: JobPatch) -> SchedulerResult<Job> {
        let jobs = self.jobs.clone();
        let job_id = job_id.to_string();
        self.run("set_job_fields", move || jobs.set_job_fields(&job_id, &fields))
            .await
    }

    pub async fn delete_job(&self, job_id: &str) -> SchedulerResult<bool> {
        let jobs = self.jobs.clone();
        let job_id = job_id.to_string();
        self.run("delete_job", move || jobs.delete_job(&job_id)).await
    }

    // ── Users ──────────────────────────────────────────────────────

    pub async fn get_user(&self, user_id: &str) -> SchedulerResult<Option<User>> {
        let users = self.users.clone();
        let user_id = user_id.to_string();
        self.run("get_user", move || users.get_user(&user_id)).await
    }

    pub async fn list_users(&self) -> SchedulerResult<Vec<User>> {
        let users = self.users.clone();
        self.run("list_users", move || users.list_users()).await
    }

    pub async fn append_user_job(&self, user_id: &str, job_id: &str) -> SchedulerResult<()> {
        let users = self.users.clone();
        let (user_id, job_id) = (user_id.to_string(), job_id.to_string());
        self.run("append_user_job", move || users.append_user_job(&user_id, &job_id))
            .await
    }

    pub async fn remove_user_job(&self, user_id: &str, job_id: &str) -> SchedulerResult<bool> {
        let users = self.users.clone();
        let (user_id, job_id) = (user_id.to_string(), job_id.to_string());
        self.run("remove_user_job", move || users.remove_user_job(&user_id, &job_id))
            .await
    }
}
