//! Bounded retries with exponential backoff for calls to external
//! dependencies.
//!
//! Each attempt is bounded by a timeout, so a hung dependency never blocks
//! the caller for longer than `max_attempts * (attempt_timeout + backoff)`.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use tracing::warn;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,

    /// Delay before the second attempt. Doubles for every further attempt.
    pub initial_backoff: Duration,

    /// Upper bound for a single backoff delay.
    pub max_backoff: Duration,

    /// Upper bound for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }

    /// Run `attempt_fn` until it succeeds or the attempts are exhausted.
    ///
    /// Returns the last error, annotated with the operation name and the
    /// number of attempts made.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = anyhow!("{operation} was not attempted");

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.attempt_timeout, attempt_fn()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!(operation, attempt, error = %e, "Attempt failed");
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        operation,
                        attempt,
                        timeout_ms = self.attempt_timeout.as_millis() as u64,
                        "Attempt timed out"
                    );
                    last_error = anyhow!("timed out after {:?}", self.attempt_timeout);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.backoff_for(attempt)).await;
            }
        }

        Err(last_error.context(format!("{operation} failed after {attempts} attempts")))
    }
}
