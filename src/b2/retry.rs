//! Retry with exponential backoff
//!
//! Used for the idempotent JSON calls of the B2 API. Part and file uploads are
//! never retried here; the engine owns that decision.

use crate::upload::StorageError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Backoff settings
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, doubled for each further retry
    pub base_delay_ms: u64,
    /// Random spread around the delay, as a fraction (0.25 = ±25%)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let jitter_range = (base_delay as f64 * self.jitter_factor) as u64;
        if jitter_range == 0 {
            return Duration::from_millis(base_delay);
        }
        let jitter =
            rand::rng().random_range(0..=jitter_range * 2) as i64 - jitter_range as i64;
        Duration::from_millis((base_delay as i64 + jitter).max(0) as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up
    ///
    /// Sleeping between attempts is interrupted by `cancel`.
    pub async fn run<F, Fut, T>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying B2 call"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(StorageError::Aborted),
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
