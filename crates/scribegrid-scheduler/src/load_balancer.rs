//! Least-loaded server selection.
//!
//! Picks the server with the fewest current jobs. When several servers
//! share the minimum, one of them is chosen uniformly at random so a fresh
//! fleet does not pile everything onto the first server listed.

use rand::Rng;
use serde::{Deserialize, Serialize};

use scribegrid_state::Server;

use crate::error::{SchedulerError, SchedulerResult};

/// Which servers are eligible for placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Only servers whose status is "active" (case-insensitive).
    #[default]
    ActiveOnly,
    /// Every registered server, whatever its status.
    StatusBlind,
}

impl PlacementPolicy {
    /// Filter `servers` down to the placement candidates.
    pub fn candidates(&self, servers: Vec<Server>) -> Vec<Server> {
        match self {
            PlacementPolicy::ActiveOnly => servers.into_iter().filter(Server::is_active).collect(),
            PlacementPolicy::StatusBlind => servers,
        }
    }
}

/// Choose the server with the fewest current jobs, breaking ties uniformly.
///
/// Returns `NoCandidates` for an empty slice.
pub fn select_target<'a, R: Rng + ?Sized>(
    candidates: &'a [Server],
    rng: &mut R,
) -> SchedulerResult<&'a Server> {
    let min_load = candidates
        .iter()
        .map(Server::load)
        .min()
        .ok_or(SchedulerError::NoCandidates)?;

    let tied: Vec<&Server> = candidates.iter().filter(|s| s.load() == min_load).collect();
    let pick = rng.gen_range(0..tied.len());
    Ok(tied[pick])
}

/// Placement policy plus least-loaded selection.
#[derive(Debug, Clone, Default)]
pub struct LeastLoadedBalancer {
    policy: PlacementPolicy,
}

impl LeastLoadedBalancer {
    pub fn new(policy: PlacementPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    pub fn candidates(&self, servers: Vec<Server>) -> Vec<Server> {
        self.policy.candidates(servers)
    }

    /// Select a target among `candidates` using the thread-local RNG.
    pub fn select<'a>(&self, candidates: &'a [Server]) -> SchedulerResult<&'a Server> {
        select_target(candidates, &mut rand::thread_rng())
    }
}
