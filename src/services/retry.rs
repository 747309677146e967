//! Retry policy with randomized exponential backoff.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::errors::{DbError, DbResult};
use crate::domain::models::RetryConfig;

/// Retry policy for transient failures.
///
/// Only errors for which [`DbError::is_transient`] holds are retried. The
/// number of attempts is bounded by `max_attempts` and the total time spent
/// by the backoff's maximum elapsed time, whichever is hit first.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_elapsed: Duration,
    multiplier: f64,
    randomization_factor: f64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            max_elapsed: Duration::from_millis(config.max_elapsed_ms),
            multiplier: config.multiplier,
            randomization_factor: config.randomization_factor,
        }
    }

    /// A policy that runs the operation once.
    pub fn no_retry() -> Self {
        Self::new(&RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.randomization_factor)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }

    /// Execute an operation, retrying transient failures.
    ///
    /// The error returned after exhausting the policy carries the total
    /// number of attempts made.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> DbResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let mut backoff = self.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => {
                    debug!(operation, attempt, error = %err, "permanent error, not retrying");
                    return Err(err.with_attempts(attempt));
                }
                Err(err) => {
                    let delay = if attempt < self.max_attempts {
                        backoff.next_backoff()
                    } else {
                        None
                    };

                    let Some(delay) = delay else {
                        warn!(operation, attempts = attempt, error = %err, "retries exhausted");
                        return Err(err.with_attempts(attempt));
                    };

                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}
