//! Domain types for the ScribeGrid state store.
//!
//! These types represent the persisted documents: worker servers, jobs,
//! and users with their embedded payments. All types serialize to/from
//! field-named JSON records, both for storage in redb tables and for
//! transport at the HTTP boundary.

use serde::{Deserialize, Serialize};

/// Unique identifier for a worker server.
pub type ServerId = String;

/// Unique identifier for a job.
pub type JobId = String;

/// Unique identifier for a user account.
pub type UserId = String;

/// Unique identifier for a payment record.
pub type PaymentId = String;

/// Status string a server must carry to be placed on under the active-only policy.
pub const ACTIVE_STATUS: &str = "active";

// ── Server ────────────────────────────────────────────────────────

/// A worker server that performs transcription/translation jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Server {
    pub id: ServerId,
    pub hostname: String,
    pub address: String,
    pub description: String,
    /// Free-text status, e.g. "active" or "inactive".
    pub status: String,
    /// CPU descriptor (free text).
    pub cpu_info: String,
    /// GPU descriptor (free text).
    pub gpu_info: String,
    pub ram_size_gb: u32,
    /// Jobs currently hosted, in assignment order.
    pub current_jobs: Vec<JobId>,
    /// Jobs this server has finished, in completion order.
    pub completed_jobs: Vec<JobId>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Server {
    /// Number of in-flight jobs, the quantity placement balances on.
    pub fn load(&self) -> usize {
        self.current_jobs.len()
    }

    /// Whether the server's status marks it as accepting work.
    pub fn is_active(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(ACTIVE_STATUS)
    }

    /// Whether the job id appears in either job list.
    pub fn references(&self, job_id: &str) -> bool {
        self.current_jobs.iter().any(|j| j == job_id)
            || self.completed_jobs.iter().any(|j| j == job_id)
    }
}

/// Partial update for a server; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram_size_gb: Option<u32>,
}

impl ServerPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the set fields to `server`. Job lists are never patched here.
    pub fn apply(&self, server: &mut Server, now: u64) {
        if let Some(v) = &self.hostname {
            server.hostname = v.clone();
        }
        if let Some(v) = &self.address {
            server.address = v.clone();
        }
        if let Some(v) = &self.description {
            server.description = v.clone();
        }
        if let Some(v) = &self.status {
            server.status = v.clone();
        }
        if let Some(v) = &self.cpu_info {
            server.cpu_info = v.clone();
        }
        if let Some(v) = &self.gpu_info {
            server.gpu_info = v.clone();
        }
        if let Some(v) = self.ram_size_gb {
            server.ram_size_gb = v;
        }
        server.updated_at = now;
    }
}

// ── Job ───────────────────────────────────────────────────────────

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    #[serde(alias = "in-progress")]
    InProgress,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transcription/translation job submitted by a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub title: String,
    pub status: JobStatus,
    pub source_language: String,
    pub file_format: String,
    pub description: String,
    pub input_file: String,
    pub output_file: String,
    /// Server hosting this job; `None` until placement completes.
    pub host_id: Option<ServerId>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Unix timestamp after which the job counts as finished.
    #[serde(alias = "estimated_finish_datetime")]
    pub estimated_finish_at: u64,
}

impl Job {
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Whether the estimated finish lies strictly before `now` on a job
    /// that has not been marked completed yet.
    pub fn is_overdue(&self, now: u64) -> bool {
        !self.is_completed() && self.estimated_finish_at < now
    }
}

/// Partial update for a job; `None` fields are left untouched.
///
/// `host_id` and `updated_at` are never read from client input: the host
/// reference only changes through the assignment protocol.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", alias = "estimated_finish_datetime")]
    pub estimated_finish_at: Option<u64>,
    #[serde(skip)]
    pub host_id: Option<ServerId>,
    #[serde(skip)]
    pub updated_at: Option<u64>,
}

impl JobPatch {
    /// Patch that only moves the job onto a host.
    pub fn host(server_id: &str, now: u64) -> Self {
        Self {
            host_id: Some(server_id.to_string()),
            updated_at: Some(now),
            ..Self::default()
        }
    }

    /// Patch that only changes the status.
    pub fn status(status: JobStatus, now: u64) -> Self {
        Self {
            status: Some(status),
            updated_at: Some(now),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the set fields to `job`, stamping `updated_at` (or `now` when unset).
    pub fn apply(&self, job: &mut Job, now: u64) {
        if let Some(v) = &self.title {
            job.title = v.clone();
        }
        if let Some(v) = self.status {
            job.status = v;
        }
        if let Some(v) = &self.source_language {
            job.source_language = v.clone();
        }
        if let Some(v) = &self.file_format {
            job.file_format = v.clone();
        }
        if let Some(v) = &self.description {
            job.description = v.clone();
        }
        if let Some(v) = &self.input_file {
            job.input_file = v.clone();
        }
        if let Some(v) = &self.output_file {
            job.output_file = v.clone();
        }
        if let Some(v) = self.estimated_finish_at {
            job.estimated_finish_at = v;
        }
        if let Some(v) = &self.host_id {
            job.host_id = Some(v.clone());
        }
        job.updated_at = self.updated_at.unwrap_or(now);
    }
}

// ── User ──────────────────────────────────────────────────────────

/// A payment embedded in its owning user document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Payment {
    pub id: PaymentId,
    /// Amount as entered, e.g. "100.00".
    pub price: String,
    pub payment_method: String,
    pub payment_status: String,
    pub job_id: JobId,
    pub created_at: u64,
    pub updated_at: u64,
}

/// A user account owning jobs and payments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    /// Role, e.g. "user" or "admin".
    pub permissions: String,
    /// Ids of jobs this user created.
    pub jobs: Vec<JobId>,
    pub payments: Vec<Payment>,
    pub created_at: u64,
    pub updated_at: u64,
    pub last_login_at: u64,
}

/// Partial update for a user; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payments: Option<Vec<Payment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<JobId>>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, user: &mut User, now: u64) {
        if let Some(v) = &self.username {
            user.username = v.clone();
        }
        if let Some(v) = &self.email {
            user.email = v.clone();
        }
        if let Some(v) = &self.permissions {
            user.permissions = v.clone();
        }
        if let Some(v) = &self.payments {
            user.payments = v.clone();
        }
        if let Some(v) = &self.jobs {
            user.jobs = v.clone();
        }
        user.updated_at = now;
    }
}

// ── Snapshot ──────────────────────────────────────────────────────

/// Full dump of the store, used for export/import and seeding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub servers: Vec<Server>,
    pub jobs: Vec<Job>,
}
