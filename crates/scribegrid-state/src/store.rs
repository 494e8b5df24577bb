//! StateStore — redb-backed document persistence for ScribeGrid.
//!
//! Provides typed CRUD operations over servers, jobs, and users. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type DocTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe document store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVERS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Cheap liveness check: open and close a read transaction.
    pub fn ping(&self) -> StateResult<()> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        txn.open_table(SERVERS).map_err(map_err!(Table))?;
        Ok(())
    }

    // ── Document helpers ───────────────────────────────────────────

    fn put_doc<T: Serialize>(&self, table: DocTable, key: &str, doc: &T) -> StateResult<()> {
        let value = serde_json::to_vec(doc).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert a document, failing with `Conflict` if the key is taken.
    fn insert_new_doc<T: Serialize>(&self, table: DocTable, key: &str, doc: &T) -> StateResult<()> {
        let value = serde_json::to_vec(doc).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            if t.get(key).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!("{} {key} already exists", table.name())));
            }
            t.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_doc<T: DeserializeOwned>(&self, table: DocTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let doc: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn list_docs<T: DeserializeOwned>(&self, table: DocTable) -> StateResult<Vec<T>> {
        let mut results = Vec::new();
        for (_, bytes) in self.raw_entries(table)? {
            let doc: T = serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
            results.push(doc);
        }
        Ok(results)
    }

    /// Copy every `(key, value)` pair out of a table in one read transaction.
    pub(crate) fn raw_entries(&self, table: DocTable) -> StateResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut entries = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            entries.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(entries)
    }

    fn delete_doc(&self, table: DocTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = table.name(), %key, existed, "document deleted");
        Ok(existed)
    }

    /// Atomically read, mutate, and write back one document.
    ///
    /// The whole cycle runs inside a single write transaction, so concurrent
    /// updates to the same document are serialized by redb. If `f` returns an
    /// error nothing is written.
    pub(crate) fn update_doc<T, R, F>(&self, table: DocTable, key: &str, f: F) -> StateResult<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> StateResult<R>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let bytes = t
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(format!("{} {key}", table.name())))?;
            let mut doc: T = serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
            result = f(&mut doc)?;
            let value = serde_json::to_vec(&doc).map_err(map_err!(Serialize))?;
            t.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(result)
    }

    // ── Servers ────────────────────────────────────────────────────

    /// Insert or replace a server document.
    pub fn put_server(&self, server: &Server) -> StateResult<()> {
        self.put_doc(SERVERS, &server.id, server)?;
        debug!(server_id = %server.id, "server stored");
        Ok(())
    }

    /// Get a server by ID.
    pub fn get_server(&self, server_id: &str) -> StateResult<Option<Server>> {
        self.get_doc(SERVERS, server_id)
    }

    /// List all servers.
    pub fn list_servers(&self) -> StateResult<Vec<Server>> {
        self.list_docs(SERVERS)
    }

    /// Apply a partial update to a server and return the result.
    pub fn patch_server(&self, server_id: &str, patch: &ServerPatch) -> StateResult<Server> {
        let now = epoch_secs();
        self.update_doc(SERVERS, server_id, |server: &mut Server| {
            patch.apply(server, now);
            Ok(server.clone())
        })
    }

    /// Delete a server by ID. Returns true if it existed.
    pub fn delete_server(&self, server_id: &str) -> StateResult<bool> {
        self.delete_doc(SERVERS, server_id)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or replace a job document.
    pub fn put_job(&self, job: &Job) -> StateResult<()> {
        self.put_doc(JOBS, &job.id, job)
    }

    /// Insert a new job; `Conflict` if the id already exists.
    pub fn insert_job(&self, job: &Job) -> StateResult<()> {
        self.insert_new_doc(JOBS, &job.id, job)?;
        debug!(job_id = %job.id, user_id = %job.user_id, "job inserted");
        Ok(())
    }

    /// Get a job by ID.
    pub fn get_job(&self, job_id: &str) -> StateResult<Option<Job>> {
        self.get_doc(JOBS, job_id)
    }

    /// List all jobs.
    pub fn list_jobs(&self) -> StateResult<Vec<Job>> {
        self.list_docs(JOBS)
    }

    /// Fetch the jobs with the given ids, skipping ids that no longer resolve.
    pub fn get_jobs(&self, job_ids: &[JobId]) -> StateResult<Vec<Job>> {
        let mut jobs = Vec::with_capacity(job_ids.len());
        for id in job_ids {
            if let Some(job) = self.get_job(id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Apply a partial update to a job and return the result.
    pub fn patch_job(&self, job_id: &str, patch: &JobPatch) -> StateResult<Job> {
        let now = epoch_secs();
        self.update_doc(JOBS, job_id, |job: &mut Job| {
            patch.apply(job, now);
            Ok(job.clone())
        })
    }

    /// Delete a job by ID. Returns true if it existed.
    pub fn delete_job(&self, job_id: &str) -> StateResult<bool> {
        self.delete_doc(JOBS, job_id)
    }

    // ── Users ──────────────────────────────────────────────────────

    /// Insert or replace a user document.
    pub fn put_user(&self, user: &User) -> StateResult<()> {
        self.put_doc(USERS, &user.id, user)?;
        debug!(user_id = %user.id, "user stored");
        Ok(())
    }

    /// Get a user by ID.
    pub fn get_user(&self, user_id: &str) -> StateResult<Option<User>> {
        self.get_doc(USERS, user_id)
    }

    /// List all users.
    pub fn list_users(&self) -> StateResult<Vec<User>> {
        self.list_docs(USERS)
    }

    /// Apply a partial update to a user and return the result.
    pub fn patch_user(&self, user_id: &str, patch: &UserPatch) -> StateResult<User> {
        let now = epoch_secs();
        self.update_doc(USERS, user_id, |user: &mut User| {
            patch.apply(user, now);
            Ok(user.clone())
        })
    }

    /// Delete a user by ID. Returns true if it existed.
    pub fn delete_user(&self, user_id: &str) -> StateResult<bool> {
        self.delete_doc(USERS, user_id)
    }

    // ── Payments ───────────────────────────────────────────────────

    /// Append a payment to a user's embedded payment list.
    pub fn push_payment(&self, user_id: &str, payment: &Payment) -> StateResult<()> {
        self.update_doc(USERS, user_id, |user: &mut User| {
            user.payments.push(payment.clone());
            Ok(())
        })
    }

    /// Remove a payment from a user. Returns true if it was present.
    pub fn pull_payment(&self, user_id: &str, payment_id: &str) -> StateResult<bool> {
        self.update_doc(USERS, user_id, |user: &mut User| {
            let before = user.payments.len();
            user.payments.retain(|p| p.id != payment_id);
            Ok(user.payments.len() != before)
        })
    }

    // ── Snapshot ───────────────────────────────────────────────────

    /// Dump every document in the store.
    pub fn export_snapshot(&self) -> StateResult<Snapshot> {
        Ok(Snapshot {
            users: self.list_users()?,
            servers: self.list_servers()?,
            jobs: self.list_jobs()?,
        })
    }

    /// Replace the entire store content with `snapshot` in one transaction.
    pub fn import_snapshot(&self, snapshot: &Snapshot) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            replace_table(&txn, USERS, snapshot.users.iter().map(|u| (u.id.as_str(), u)))?;
            replace_table(&txn, SERVERS, snapshot.servers.iter().map(|s| (s.id.as_str(), s)))?;
            replace_table(&txn, JOBS, snapshot.jobs.iter().map(|j| (j.id.as_str(), j)))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            users = snapshot.users.len(),
            servers = snapshot.servers.len(),
            jobs = snapshot.jobs.len(),
            "snapshot imported"
        );
        Ok(())
    }
}

/// Clear `table` and fill it with `docs`, inside the caller's transaction.
fn replace_table<'a, T, I>(txn: &redb::WriteTransaction, table: DocTable, docs: I) -> StateResult<()>
where
    T: Serialize + 'a,
    I: Iterator<Item = (&'a str, &'a T)>,
{
    let mut t = txn.open_table(table).map_err(map_err!(Table))?;
    let keys: Vec<String> = t
        .iter()
        .map_err(map_err!(Read))?
        .map(|entry| entry.map(|(k, _)| k.value().to_string()))
        .collect::<Result<_, _>>()
        .map_err(map_err!(Read))?;
    for key in &keys {
        t.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    for (key, doc) in docs {
        let value = serde_json::to_vec(doc).map_err(map_err!(Serialize))?;
        t.insert(key, value.as_slice()).map_err(map_err!(Write))?;
    }
    Ok(())
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
