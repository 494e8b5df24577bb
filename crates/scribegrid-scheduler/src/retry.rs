//! Bounded retry with exponential backoff.
//!
//! Used for the host-reference write of the assignment saga. Only
//! transient errors (persistence faults and timeouts) are retried; a
//! `NotFound` or `Validation` error ends the loop immediately.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SchedulerResult;

/// `[scheduler.assign_retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from the initial backoff up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Returns the final result together with the number of attempts made.
    pub async fn retry<T, F, Fut>(&self, operation: &'static str, mut op: F) -> (SchedulerResult<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SchedulerResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    debug!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use scribegrid_state::StateError;

    use super::*;
    use crate::error::SchedulerError;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(10), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let (result, attempts) = fast(3)
            .retry("op", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SchedulerError::Persistence(StateError::Write("busy".into())))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn permanent_errors_stop_immediately() {
        let (result, attempts) = fast(5)
            .retry("op", || async { Err::<(), _>(SchedulerError::NotFound("job".into())) })
            .await;
        assert!(matches!(result, Err(SchedulerError::NotFound(_))));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let (result, attempts) = fast(3)
            .retry("op", || async {
                Err::<(), _>(SchedulerError::Persistence(StateError::Write("down".into())))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }
}
