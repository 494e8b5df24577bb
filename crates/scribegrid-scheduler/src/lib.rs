//! scribegrid-scheduler — job placement and lifecycle.
//!
//! Places transcription/translation jobs on worker servers and advances
//! them through their lifecycle. The scheduler:
//!
//! - Selects the least-loaded server, breaking ties uniformly at random
//! - Records the job↔server association on both documents with a
//!   compensating saga (the store has no cross-document transaction)
//! - Sweeps overdue jobs to `completed` and migrates them to the host's
//!   completed list
//! - Reconciles drift left behind by partial failures
//!
//! # Architecture
//!
//! ```text
//! JobOrchestrator (submit / delete / list / attach)
//!   ├── LeastLoadedBalancer (policy filter + min-load random pick)
//!   ├── Assigner (append to server → set job host, retry + rollback)
//!   └── Sweeper (overdue → completed, periodic loop)
//! Reconciler (periodic repair pass)
//!
//! All of them talk to the store through `Stores`:
//!   ServerRegistry + JobStore + UserStore, each call under a deadline
//! ```

pub mod assigner;
pub mod config;
pub mod error;
pub mod load_balancer;
pub mod orchestrator;
pub mod reconciler;
pub mod retry;
pub mod stores;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use assigner::{Assigner, Assignment};
pub use config::{SchedulerConfig, SweeperConfig};
pub use error::{AssignmentError, SchedulerError, SchedulerResult};
pub use load_balancer::{LeastLoadedBalancer, PlacementPolicy, select_target};
pub use orchestrator::{JobOrchestrator, JobSpec};
pub use reconciler::{ReconcileReport, Reconciler};
pub use retry::RetryPolicy;
pub use stores::Stores;
pub use sweeper::{SweepReport, Sweeper};

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
