//! Scheduler error types.

use std::time::Duration;

use scribegrid_state::{Job, StateError};
use thiserror::Error;

/// Errors that can occur during placement and lifecycle operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no candidate servers available for placement")]
    NoCandidates,

    #[error("assignment failed: {0}")]
    Assignment(#[from] AssignmentError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence error: {0}")]
    Persistence(StateError),

    #[error("store operation {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The job is stored and placed, but the owner's job list was not
    /// updated. Retry the link only; the job must not be placed again.
    #[error("job {} was placed on {} but linking it to user {} failed: {source}",
        .job.id, .job.host_id.as_deref().unwrap_or("-"), .job.user_id)]
    UserLink {
        job: Box<Job>,
        source: Box<SchedulerError>,
    },
}

/// Partial failure of the two-step job↔server write.
#[derive(Debug, Error)]
pub enum AssignmentError {
    /// The host reference could not be written; the server entry was removed again.
    #[error("host update for job {job_id} on server {server_id} failed after {attempts} attempts, server entry rolled back: {reason}")]
    RolledBack {
        job_id: String,
        server_id: String,
        attempts: u32,
        reason: String,
    },

    /// The server lists the job but the job does not reference the server,
    /// and the rollback failed too. Left for the reconciler.
    #[error("job {job_id} is listed on server {server_id} without a matching host reference: {reason}")]
    Inconsistent {
        job_id: String,
        server_id: String,
        reason: String,
    },
}

impl SchedulerError {
    /// Whether retrying the same store call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Persistence(_) | SchedulerError::Timeout { .. }
        )
    }
}

impl From<StateError> for SchedulerError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => SchedulerError::NotFound(what),
            StateError::Conflict(what) => SchedulerError::Conflict(what),
            other => SchedulerError::Persistence(other),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
