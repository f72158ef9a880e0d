//! Retry policy for page requests.
//!
//! The policy is an explicit object (attempt cap, backoff schedule,
//! retryable predicate on the error) wrapped around the single page-fetch
//! operation, so it can be tested without a network.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::FetchError;

/// Exponential backoff with an attempt cap.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for the first retry.
    pub base: Duration,
    /// Factor by which the delay grows each attempt.
    pub multiplier: f64,
    /// Cap for the computed delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            base: Duration::from_secs(1),
            multiplier: 2.0,
            cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let pow = self.multiplier.powi(attempt as i32);
        let scaled = if pow.is_finite() {
            self.base.mul_f64(pow)
        } else {
            self.cap
        };
        scaled.min(self.cap)
    }
}

/// Run `op` under the retry policy.
///
/// Retries only errors for which [`FetchError::is_retryable`] holds; a
/// non-retryable error aborts immediately. Exhausting the attempt cap
/// surfaces [`FetchError::AttemptsExhausted`].
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut last_message = String::new();

    for attempt in 0..policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                last_message = e.to_string();
                let delay = policy.next_delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %e,
                    "Page request failed, retrying"
                );
                // No sleep after the final attempt; exhaustion is reported below
                if attempt + 1 < policy.max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(FetchError::AttemptsExhausted {
        attempts: policy.max_attempts,
        message: last_message,
    })
}
