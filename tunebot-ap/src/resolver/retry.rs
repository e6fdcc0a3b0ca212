//! Bounded retry for content resolution
//!
//! Only `ResolutionError::RateLimited` is retried. Each retry waits for an
//! exponentially growing backoff, capped at `max_backoff`. Every other
//! failure is returned immediately.

use crate::error::ResolutionError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    multiplier: f64,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::from_secs(5), 2.0, Duration::from_secs(30))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, multiplier: f64, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            multiplier: multiplier.max(1.0),
            max_backoff,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let scaled = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_nanos() as f64 {
            return self.max_backoff;
        }
        Duration::from_nanos(scaled as u64)
    }

    /// Run `operation`, retrying rate-limited failures
    ///
    /// The operation runs at most `max_retries + 1` times. The last error is
    /// returned once retries are exhausted.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, ResolutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResolutionError>>,
    {
        let mut retry = 0u32;

        loop {
            if retry > 0 {
                tracing::debug!(operation = operation_name, retry, "Retrying resolution");
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.backoff(retry);
                    tracing::warn!(
                        operation = operation_name,
                        retry,
                        max_retries = self.max_retries,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Rate limited, will retry after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!(
                            operation = operation_name,
                            attempts = retry + 1,
                            "Still rate limited after retries"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}
