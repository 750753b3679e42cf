//! Exponential backoff for whole operations.

use std::future::Future;
use std::time::{Duration, SystemTime};

use log::*;
use reqwest_retry::policies::{ExponentialBackoff, ExponentialBackoffTimed};
use reqwest_retry::{Jitter, RetryDecision, RetryPolicy};
use tokio::time::sleep;

use crate::error::Error;

/// Exponential backoff with full jitter, bounded by a total time budget.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// Total time after which no further attempt is started.
    pub max_elapsed: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    fn retry_policy(&self) -> ExponentialBackoffTimed {
        ExponentialBackoff::builder()
            .retry_bounds(self.base_delay, self.max_delay.max(self.base_delay))
            .base(self.multiplier)
            .jitter(if self.jitter { Jitter::Full } else { Jitter::None })
            .build_with_total_retry_duration(self.max_elapsed)
    }

    /// Delay before the attempt following `n_past_retries` retries, or `None`
    /// once the budget measured from `started` is spent.
    fn next_delay(
        &self,
        policy: &ExponentialBackoffTimed,
        started: SystemTime,
        n_past_retries: u32,
    ) -> Option<Duration> {
        let decision = policy.should_retry(started, n_past_retries);
        let now = SystemTime::now();
        let remaining = (started + self.max_elapsed)
            .duration_since(now)
            .unwrap_or_default();

        match decision {
            RetryDecision::Retry { execute_after } if !remaining.is_zero() => Some(
                execute_after
                    .duration_since(now)
                    .unwrap_or_default()
                    .min(remaining),
            ),
            _ => None,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or the
/// policy's budget is spent. The last error is returned when giving up.
///
/// The sleep before the next attempt is cut short so no attempt starts after the
/// budget has elapsed.
pub async fn retry<T, F, Fut>(policy: &BackoffPolicy, mut operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let retry_policy = policy.retry_policy();
    let started = SystemTime::now();
    let mut n_attempts: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        n_attempts += 1;

        if !err.is_transient() {
            return Err(err);
        }

        let Some(delay) = policy.next_delay(&retry_policy, started, n_attempts - 1) else {
            warn!("Giving up after {n_attempts} attempts: {err}");
            return Err(err);
        };
        warn!("Attempt {n_attempts} failed ({err}), retrying in {delay:?}");
        sleep(delay).await;
    }
}
