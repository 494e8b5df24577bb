//! Collaborator interfaces consumed by the placement core.
//!
//! The scheduler, sweeper, and orchestrator receive these traits as
//! `Arc<dyn …>` handles instead of reaching for a global store, so tests
//! can wrap or replace any of them. Every mutating method is one atomic
//! single-document update; none of them spans two documents.

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::StateStore;
use crate::tables::{JOBS, SERVERS, USERS};
use crate::types::*;

/// Reads and atomically updates server documents.
pub trait ServerRegistry: Send + Sync {
    /// Every registered server, regardless of status.
    fn find_all_servers(&self) -> StateResult<Vec<Server>>;

    fn get_server(&self, server_id: &str) -> StateResult<Option<Server>>;

    /// Append `job_id` to the server's current jobs. Appending an id that is
    /// already present is a no-op. `NotFound` if the server is absent.
    fn append_current_job(&self, server_id: &str, job_id: &str) -> StateResult<()>;

    /// Remove `job_id` from the server's current jobs. Returns whether it was listed.
    fn remove_current_job(&self, server_id: &str, job_id: &str) -> StateResult<bool>;

    /// Move `job_id` from current to completed jobs. Returns whether it was
    /// listed as current.
    fn complete_job(&self, server_id: &str, job_id: &str) -> StateResult<bool>;

    /// Move `job_id` from completed back to current jobs. Returns whether
    /// the current list changed.
    fn reopen_job(&self, server_id: &str, job_id: &str) -> StateResult<bool>;

    /// Remove `job_id` from both job lists. Returns whether it was listed anywhere.
    fn detach_job(&self, server_id: &str, job_id: &str) -> StateResult<bool>;
}

/// Reads and writes job documents.
pub trait JobStore: Send + Sync {
    /// Lazily decoded sequence of every job whose status differs from `status`.
    fn find_jobs_not_status(&self, status: JobStatus) -> StateResult<JobCursor>;

    fn get_job(&self, job_id: &str) -> StateResult<Option<Job>>;

    fn list_jobs(&self) -> StateResult<Vec<Job>>;

    /// Insert a new job. `Conflict` if the id is taken.
    fn insert_job(&self, job: &Job) -> StateResult<()>;

    /// Apply `fields` to the job. `NotFound` if the job is absent.
    fn set_job_fields(&self, job_id: &str, fields: &JobPatch) -> StateResult<Job>;

    /// Returns whether the job existed.
    fn delete_job(&self, job_id: &str) -> StateResult<bool>;
}

/// Reads and atomically updates user job lists.
pub trait UserStore: Send + Sync {
    fn get_user(&self, user_id: &str) -> StateResult<Option<User>>;

    fn list_users(&self) -> StateResult<Vec<User>>;

    /// Append `job_id` to the user's jobs (no-op if present). `NotFound` if
    /// the user is absent.
    fn append_user_job(&self, user_id: &str, job_id: &str) -> StateResult<()>;

    /// Returns whether the id was listed.
    fn remove_user_job(&self, user_id: &str, job_id: &str) -> StateResult<bool>;
}

/// Iterator over jobs that decodes one record per step.
///
/// A record that fails to decode yields an `Err` item and iteration goes on,
/// so a single corrupt document never hides the rest.
pub struct JobCursor {
    raw: std::vec::IntoIter<(String, Vec<u8>)>,
    exclude: Option<JobStatus>,
}

impl JobCursor {
    /// Build a cursor over raw `(key, json)` records, skipping `exclude`.
    pub fn from_raw(raw: Vec<(String, Vec<u8>)>, exclude: Option<JobStatus>) -> Self {
        Self {
            raw: raw.into_iter(),
            exclude,
        }
    }
}

impl Iterator for JobCursor {
    type Item = StateResult<Job>;

    fn next(&mut self) -> Option<Self::Item> {
        for (key, bytes) in self.raw.by_ref() {
            match serde_json::from_slice::<Job>(&bytes) {
                Ok(job) if Some(job.status) == self.exclude => continue,
                Ok(job) => return Some(Ok(job)),
                Err(e) => return Some(Err(StateError::Deserialize(format!("job {key}: {e}")))),
            }
        }
        None
    }
}

// ── StateStore implementations ────────────────────────────────────

impl ServerRegistry for StateStore {
    fn find_all_servers(&self) -> StateResult<Vec<Server>> {
        self.list_servers()
    }

    fn get_server(&self, server_id: &str) -> StateResult<Option<Server>> {
        StateStore::get_server(self, server_id)
    }

    fn append_current_job(&self, server_id: &str, job_id: &str) -> StateResult<()> {
        let appended = self.update_doc(SERVERS, server_id, |server: &mut Server| {
            if server.current_jobs.iter().any(|j| j == job_id) {
                return Ok(false);
            }
            server.current_jobs.push(job_id.to_string());
            Ok(true)
        })?;
        debug!(%server_id, %job_id, appended, "current job appended");
        Ok(())
    }

    fn remove_current_job(&self, server_id: &str, job_id: &str) -> StateResult<bool> {
        self.update_doc(SERVERS, server_id, |server: &mut Server| {
            let before = server.current_jobs.len();
            server.current_jobs.retain(|j| j != job_id);
            Ok(server.current_jobs.len() != before)
        })
    }

    fn complete_job(&self, server_id: &str, job_id: &str) -> StateResult<bool> {
        self.update_doc(SERVERS, server_id, |server: &mut Server| {
            let before = server.current_jobs.len();
            server.current_jobs.retain(|j| j != job_id);
            let moved = server.current_jobs.len() != before;
            if moved && !server.completed_jobs.iter().any(|j| j == job_id) {
                server.completed_jobs.push(job_id.to_string());
            }
            Ok(moved)
        })
    }

    fn reopen_job(&self, server_id: &str, job_id: &str) -> StateResult<bool> {
        self.update_doc(SERVERS, server_id, |server: &mut Server| {
            server.completed_jobs.retain(|j| j != job_id);
            if server.current_jobs.iter().any(|j| j == job_id) {
                return Ok(false);
            }
            server.current_jobs.push(job_id.to_string());
            Ok(true)
        })
    }

    fn detach_job(&self, server_id: &str, job_id: &str) -> StateResult<bool> {
        self.update_doc(SERVERS, server_id, |server: &mut Server| {
            let listed = server.references(job_id);
            server.current_jobs.retain(|j| j != job_id);
            server.completed_jobs.retain(|j| j != job_id);
            Ok(listed)
        })
    }
}

impl JobStore for StateStore {
    fn find_jobs_not_status(&self, status: JobStatus) -> StateResult<JobCursor> {
        Ok(JobCursor::from_raw(self.raw_entries(JOBS)?, Some(status)))
    }

    fn get_job(&self, job_id: &str) -> StateResult<Option<Job>> {
        StateStore::get_job(self, job_id)
    }

    fn list_jobs(&self) -> StateResult<Vec<Job>> {
        StateStore::list_jobs(self)
    }

    fn insert_job(&self, job: &Job) -> StateResult<()> {
        StateStore::insert_job(self, job)
    }

    fn set_job_fields(&self, job_id: &str, fields: &JobPatch) -> StateResult<Job> {
        self.patch_job(job_id, fields)
    }

    fn delete_job(&self, job_id: &str) -> StateResult<bool> {
        StateStore::delete_job(self, job_id)
    }
}

impl UserStore for StateStore {
    fn get_user(&self, user_id: &str) -> StateResult<Option<User>> {
        StateStore::get_user(self, user_id)
    }

    fn list_users(&self) -> StateResult<Vec<User>> {
        StateStore::list_users(self)
    }

    fn append_user_job(&self, user_id: &str, job_id: &str) -> StateResult<()> {
        self.update_doc(USERS, user_id, |user: &mut User| {
            if !user.jobs.iter().any(|j| j == job_id) {
                user.jobs.push(job_id.to_string());
            }
            Ok(())
        })
    }

    fn remove_user_job(&self, user_id: &str, job_id: &str) -> StateResult<bool> {
        self.update_doc(USERS, user_id, |user: &mut User| {
            let before = user.jobs.len();
            user.jobs.retain(|j| j != job_id);
            Ok(user.jobs.len() != before)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn server(id: &str) -> Server {
        Server {
            id: id.to_string(),
            hostname: id.to_string(),
            address: "10.0.0.2".to_string(),
            status: "active".to_string(),
            ..Server::default()
        }
    }

    fn job(id: &str, status: JobStatus) -> Job {
        Job {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            status,
            ..Job::default()
        }
    }

    #[test]
    fn append_current_job_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_server(&server("srv-1")).unwrap();

        store.append_current_job("srv-1", "job-1").unwrap();
        store.append_current_job("srv-1", "job-1").unwrap();

        let srv = store.get_server("srv-1").unwrap().unwrap();
        assert_eq!(srv.current_jobs, vec!["job-1".to_string()]);
    }

    #[test]
    fn append_to_missing_server_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.append_current_job("nope", "job-1").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn concurrent_appends_are_never_lost() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        store.put_server(&server("srv-1")).unwrap();

        let mut handles = vec![];
        for t in 0..4 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                for i in 0..25 {
                    store
                        .append_current_job("srv-1", &format!("job-{t}-{i}"))
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let srv = store.get_server("srv-1").unwrap().unwrap();
        assert_eq!(srv.current_jobs.len(), 100);
    }

    #[test]
    fn complete_job_moves_between_lists() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_server(&server("srv-1")).unwrap();
        store.append_current_job("srv-1", "job-1").unwrap();

        assert!(store.complete_job("srv-1", "job-1").unwrap());
        // Second call finds nothing to move.
        assert!(!store.complete_job("srv-1", "job-1").unwrap());

        let srv = store.get_server("srv-1").unwrap().unwrap();
        assert!(srv.current_jobs.is_empty());
        assert_eq!(srv.completed_jobs, vec!["job-1".to_string()]);
    }

    #[test]
    fn reopen_job_moves_back_to_current() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_server(&server("srv-1")).unwrap();
        store.append_current_job("srv-1", "job-1").unwrap();
        store.complete_job("srv-1", "job-1").unwrap();

        assert!(store.reopen_job("srv-1", "job-1").unwrap());
        assert!(!store.reopen_job("srv-1", "job-1").unwrap());

        let srv = store.get_server("srv-1").unwrap().unwrap();
        assert_eq!(srv.current_jobs, vec!["job-1".to_string()]);
        assert!(srv.completed_jobs.is_empty());
        assert!(store.reopen_job("missing", "job-1").unwrap_err().is_not_found());
    }

    #[test]
    fn detach_clears_both_lists() {
        let store = StateStore::open_in_memory().unwrap();
        let mut srv = server("srv-1");
        srv.current_jobs = vec!["a".to_string()];
        srv.completed_jobs = vec!["b".to_string()];
        store.put_server(&srv).unwrap();

        assert!(store.detach_job("srv-1", "a").unwrap());
        assert!(store.detach_job("srv-1", "b").unwrap());
        assert!(!store.detach_job("srv-1", "c").unwrap());

        let srv = store.get_server("srv-1").unwrap().unwrap();
        assert!(!srv.references("a"));
        assert!(!srv.references("b"));
    }

    #[test]
    fn find_jobs_not_status_excludes_completed() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_job(&job("a", JobStatus::Pending)).unwrap();
        store.insert_job(&job("b", JobStatus::Completed)).unwrap();
        store.insert_job(&job("c", JobStatus::InProgress)).unwrap();

        let mut ids: Vec<String> = store
            .find_jobs_not_status(JobStatus::Completed)
            .unwrap()
            .map(|r| r.unwrap().id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn cursor_yields_error_for_corrupt_record_and_continues() {
        let good = serde_json::to_vec(&job("good", JobStatus::Pending)).unwrap();
        let raw = vec![
            ("bad".to_string(), b"{not json".to_vec()),
            ("good".to_string(), good),
        ];
        let items: Vec<_> = JobCursor::from_raw(raw, Some(JobStatus::Completed)).collect();

        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(StateError::Deserialize(_))));
        assert_eq!(items[1].as_ref().unwrap().id, "good");
    }

    #[test]
    fn user_job_list_append_and_remove() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_user(&User {
                id: "user-1".to_string(),
                ..User::default()
            })
            .unwrap();

        store.append_user_job("user-1", "job-1").unwrap();
        store.append_user_job("user-1", "job-1").unwrap();
        assert_eq!(
            UserStore::get_user(&store, "user-1").unwrap().unwrap().jobs,
            vec!["job-1".to_string()]
        );

        assert!(store.remove_user_job("user-1", "job-1").unwrap());
        assert!(!store.remove_user_job("user-1", "job-1").unwrap());
        assert!(store.append_user_job("ghost", "job-1").unwrap_err().is_not_found());
    }
}
