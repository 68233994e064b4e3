//! Retrying operations with exponential backoff and jitter.
//!
//! The export worker wraps every batch in [`retry_with_exponential_backoff`]:
//! a failed attempt is retried after `initial_delay`, then twice that, and so
//! on up to `max_delay`, with a random jitter added to each wait. After
//! `max_retries` retries the last error is returned and the caller gives up.

use crate::apm_warn;
use futures_timer::Delay;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Configuration for retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of any single delay, jitter included.
    pub max_delay: Duration,
    /// Maximum jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1600),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        RetryPolicy {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// The delay before retry number `retry` (starting at 0), without jitter.
    pub fn backoff(&self, retry: usize) -> Duration {
        let factor = 1u32.checked_shl(retry.min(31) as u32).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

fn generate_jitter(max_jitter: Duration) -> Duration {
    if max_jitter.is_zero() {
        return Duration::ZERO;
    }
    let millis = max_jitter.as_millis().min(u64::MAX as u128) as u64;
    Duration::from_millis(SmallRng::from_os_rng().random_range(0..=millis))
}

/// Retries the given operation with exponential backoff and jitter.
///
/// `operation` is called once, then up to `policy.max_retries` more times
/// while it keeps failing. The first success is returned immediately; if the
/// budget runs out the last error is returned.
pub async fn retry_with_exponential_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    E: fmt::Display,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if attempt < policy.max_retries => {
                let delay = (policy.backoff(attempt) + generate_jitter(policy.jitter))
                    .min(policy.max_delay);
                attempt += 1;
                apm_warn!(
                    name: "Retry.Scheduled",
                    operation = operation_name.to_owned(),
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = format!("{}", err)
                );
                Delay::new(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
