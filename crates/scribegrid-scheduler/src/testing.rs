//! Test fixtures and a fault-injecting store wrapper.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scribegrid_state::*;

use crate::config::SchedulerConfig;
use crate::retry::RetryPolicy;
use crate::stores::Stores;

/// Server with `load` placeholder current jobs.
pub(crate) fn server(id: &str, load: usize, status: &str) -> Server {
    Server {
        id: id.to_string(),
        hostname: format!("{id}.workers.local"),
        address: "10.0.0.10".to_string(),
        status: status.to_string(),
        current_jobs: (0..load).map(|i| format!("{id}-existing-{i}")).collect(),
        ..Server::default()
    }
}

pub(crate) fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        username: id.to_string(),
        email: format!("{id}@example.com"),
        permissions: "user".to_string(),
        ..User::default()
    }
}

pub(crate) fn job(id: &str, user_id: &str, status: JobStatus, finish_at: u64) -> Job {
    Job {
        id: id.to_string(),
        user_id: user_id.to_string(),
        title: format!("job {id}"),
        status,
        source_language: "en".to_string(),
        file_format: "mp3".to_string(),
        description: "interview".to_string(),
        input_file: format!("in/{id}.mp3"),
        output_file: format!("out/{id}.txt"),
        estimated_finish_at: finish_at,
        ..Job::default()
    }
}

/// Scheduler config with millisecond retries so failure tests stay fast.
pub(crate) fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        store_timeout_ms: 500,
        assign_retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        },
        ..SchedulerConfig::default()
    }
}

/// Wraps an in-memory `StateStore` and fails, stalls, or panics on request.
pub(crate) struct FaultyStore {
    inner: StateStore,
    faults: Mutex<HashMap<&'static str, u32>>,
    stalls: Mutex<HashMap<&'static str, Duration>>,
    panics: Mutex<HashSet<&'static str>>,
    corrupt_jobs: Mutex<Vec<(String, Vec<u8>)>>,
    calls: Mutex<HashMap<&'static str, u32>>,
    interleaved: Mutex<HashMap<&'static str, Interleaved>>,
}

type Interleaved = Box<dyn FnOnce(&StateStore) + Send>;

impl FaultyStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StateStore::open_in_memory().expect("in-memory store"),
            faults: Mutex::new(HashMap::new()),
            stalls: Mutex::new(HashMap::new()),
            panics: Mutex::new(HashSet::new()),
            corrupt_jobs: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
            interleaved: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn inner(&self) -> &StateStore {
        &self.inner
    }

    pub(crate) fn stores(self: &Arc<Self>) -> Stores {
        Stores::new(self.clone(), self.clone(), self.clone())
            .with_timeout(fast_config().store_timeout())
    }

    /// Fail the next `times` calls of `op` with a write error.
    pub(crate) fn fail(&self, op: &'static str, times: u32) {
        self.faults.lock().unwrap().insert(op, times);
    }

    pub(crate) fn fail_always(&self, op: &'static str) {
        self.fail(op, u32::MAX);
    }

    pub(crate) fn heal(&self, op: &'static str) {
        self.faults.lock().unwrap().remove(op);
    }

    pub(crate) fn stall(&self, op: &'static str, delay: Duration) {
        self.stalls.lock().unwrap().insert(op, delay);
    }

    pub(crate) fn panic_on(&self, op: &'static str) {
        self.panics.lock().unwrap().insert(op);
    }

    /// Add an undecodable record to every `find_jobs_not_status` result.
    pub(crate) fn corrupt_job(&self, key: &str) {
        self.corrupt_jobs
            .lock()
            .unwrap()
            .push((key.to_string(), b"{\"id\": 42, broken".to_vec()));
    }

    /// Run `f` against the inner store once, right after the next
    /// successful `op`. Honored by `set_job_fields`.
    pub(crate) fn interleave(&self, op: &'static str, f: impl FnOnce(&StateStore) + Send + 'static) {
        self.interleaved.lock().unwrap().insert(op, Box::new(f));
    }

    fn run_interleaved(&self, op: &'static str) {
        let f = self.interleaved.lock().unwrap().remove(op);
        if let Some(f) = f {
            f(&self.inner);
        }
    }

    /// Number of times `op` was invoked.
    pub(crate) fn calls(&self, op: &'static str) -> u32 {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn check(&self, op: &'static str) -> StateResult<()> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        if self.panics.lock().unwrap().contains(op) {
            panic!("injected panic in {op}");
        }
        let stall = self.stalls.lock().unwrap().get(op).copied();
        if let Some(delay) = stall {
            std::thread::sleep(delay);
        }
        let mut faults = self.faults.lock().unwrap();
        if let Some(remaining) = faults.get_mut(op) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(StateError::Write(format!("injected fault in {op}")));
            }
        }
        Ok(())
    }
}

impl ServerRegistry for FaultyStore {
    fn find_all_servers(&self) -> StateResult<Vec<Server>> {
        self.check("find_all_servers")?;
        ServerRegistry::find_all_servers(&self.inner)
    }

    fn get_server(&self, server_id: &str) -> StateResult<Option<Server>> {
        self.check("get_server")?;
        ServerRegistry::get_server(&self.inner, server_id)
    }

    fn append_current_job(&self, server_id: &str, job_id: &str) -> StateResult<()> {
        self.check("append_current_job")?;
        self.inner.append_current_job(server_id, job_id)
    }

    fn remove_current_job(&self, server_id: &str, job_id: &str) -> StateResult<bool> {
        self.check("remove_current_job")?;
        self.inner.remove_current_job(server_id, job_id)
    }

    fn complete_job(&self, server_id: &str, job_id: &str) -> StateResult<bool> {
        self.check("complete_job")?;
        self.inner.complete_job(server_id, job_id)
    }

    fn reopen_job(&self, server_id: &str, job_id: &str) -> StateResult<bool> {
        self.check("reopen_job")?;
        self.inner.reopen_job(server_id, job_id)
    }

    fn detach_job(&self, server_id: &str, job_id: &str) -> StateResult<bool> {
        self.check("detach_job")?;
        self.inner.detach_job(server_id, job_id)
    }
}

impl JobStore for FaultyStore {
    fn find_jobs_not_status(&self, status: JobStatus) -> StateResult<JobCursor> {
        self.check("find_jobs_not_status")?;
        let corrupt = self.corrupt_jobs.lock().unwrap().clone();
        if corrupt.is_empty() {
            return self.inner.find_jobs_not_status(status);
        }
        let mut raw = corrupt;
        for job in self.inner.find_jobs_not_status(status)? {
            let job = job?;
            let bytes = serde_json::to_vec(&job).expect("job serializes");
            raw.push((job.id, bytes));
        }
        Ok(JobCursor::from_raw(raw, Some(status)))
    }

    fn get_job(&self, job_id: &str) -> StateResult<Option<Job>> {
        self.check("get_job")?;
        JobStore::get_job(&self.inner, job_id)
    }

    fn list_jobs(&self) -> StateResult<Vec<Job>> {
        self.check("list_jobs")?;
        JobStore::list_jobs(&self.inner)
    }

    fn insert_job(&self, job: &Job) -> StateResult<()> {
        self.check("insert_job")?;
        JobStore::insert_job(&self.inner, job)
    }

    fn set_job_fields(&self, job_id: &str, fields: &JobPatch) -> StateResult<Job> {
        self.check("set_job_fields")?;
        let job = self.inner.set_job_fields(job_id, fields)?;
        self.run_interleaved("set_job_fields");
        Ok(job)
    }

    fn delete_job(&self, job_id: &str) -> StateResult<bool> {
        self.check("delete_job")?;
        JobStore::delete_job(&self.inner, job_id)
    }
}

impl UserStore for FaultyStore {
    fn get_user(&self, user_id: &str) -> StateResult<Option<User>> {
        self.check("get_user")?;
        UserStore::get_user(&self.inner, user_id)
    }

    fn list_users(&self) -> StateResult<Vec<User>> {
        self.check("list_users")?;
        UserStore::list_users(&self.inner)
    }

    fn append_user_job(&self, user_id: &str, job_id: &str) -> StateResult<()> {
        self.check("append_user_job")?;
        self.inner.append_user_job(user_id, job_id)
    }

    fn remove_user_job(&self, user_id: &str, job_id: &str) -> StateResult<bool> {
        self.check("remove_user_job")?;
        self.inner.remove_user_job(user_id, job_id)
    }
}
