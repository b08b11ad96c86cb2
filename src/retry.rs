//! Exponential backoff with jitter for transient iCloud failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Whether a failed attempt should be tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Backoff settings. Jitter keeps concurrent uploads that hit the same
/// transient failure from retrying in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-indexed):
    /// `min(base * 2^retry, max) + jitter(0..base)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = if base_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..base_ms))
        } else {
            Duration::ZERO
        };
        backoff + jitter
    }
}

/// Run `operation` until it succeeds, the classifier aborts, or the policy's
/// retries are used up. `label` identifies the work item in log lines.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    label: &str,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };
        attempt += 1;
        if attempt >= total_attempts || classifier(&err) == RetryAction::Abort {
            return Err(err);
        }
        let delay = policy.delay_for_retry(attempt - 1);
        tracing::warn!(
            item = label,
            "Retryable error (attempt {}/{}), retrying in {:.1}s: {}",
            attempt,
            total_attempts,
            delay.as_secs_f64(),
            err
        );
        tokio::time::sleep(delay).await;
    }
}
