/*!
 * Retry with exponential backoff for provider calls.
 *
 * Errors are classified by `ProviderError::class()`:
 * - Transient (429/503, overload): retried with exponential backoff plus jitter
 * - Permanent (other 4xx, auth): returned immediately
 * - Conservative (network, parse, unknown): retried with the same schedule
 */

use log::{debug, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::errors::{ErrorClass, ProviderError};

/// Backoff schedule for provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry, doubled after each retry
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to each delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries immediately (used by tests and local providers)
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, base_delay: Duration::ZERO, max_jitter: Duration::ZERO }
    }

    /// Delay before retry number `retry` (1-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempts run out.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let class = error.class();
                if class == ErrorClass::Permanent {
                    debug!("{}: permanent error, not retrying: {}", label, error);
                    return Err(error);
                }
                if attempt >= max_attempts {
                    warn!("{}: giving up after {} attempts: {}", label, attempt, error);
                    return Err(error);
                }

                let delay = policy.backoff(attempt) + policy.jitter();
                warn!(
                    "{}: attempt {}/{} failed ({:?}): {}; retrying in {:?}",
                    label, attempt, max_attempts, class, error, delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
