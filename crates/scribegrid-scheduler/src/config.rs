//! Scheduler and sweeper configuration sections.
//!
//! Both sections deserialize from the daemon's TOML file and fall back to
//! defaults for every missing key.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::load_balancer::PlacementPolicy;
use crate::retry::RetryPolicy;

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds added to the creation time to get a job's estimated finish.
    pub job_duration_secs: u64,
    /// Deadline applied to every individual store call.
    pub store_timeout_ms: u64,
    /// Which servers are eligible for placement.
    pub placement: PlacementPolicy,
    /// Retry policy for the host-reference write of the assignment saga.
    pub assign_retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            job_duration_secs: 30,
            store_timeout_ms: 3000,
            placement: PlacementPolicy::default(),
            assign_retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn job_duration(&self) -> Duration {
        Duration::from_secs(self.job_duration_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// `[sweeper]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweeperConfig {
    /// Period of the background status sweep.
    pub interval_secs: u64,
    /// Also sweep synchronously before a user's job list is read.
    pub sweep_on_read: bool,
    /// Period of the background reconciliation pass.
    pub reconcile_interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            sweep_on_read: true,
            reconcile_interval_secs: 60,
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.job_duration(), Duration::from_secs(30));
        assert_eq!(config.store_timeout(), Duration::from_secs(3));
        assert_eq!(config.placement, PlacementPolicy::ActiveOnly);

        let sweeper = SweeperConfig::default();
        assert!(sweeper.sweep_on_read);
        assert_eq!(sweeper.interval(), Duration::from_secs(5));
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let sweeper = SweeperConfig {
            interval_secs: 0,
            reconcile_interval_secs: 0,
            ..SweeperConfig::default()
        };
        assert_eq!(sweeper.interval(), Duration::from_secs(1));
        assert_eq!(sweeper.reconcile_interval(), Duration::from_secs(1));
    }
}
