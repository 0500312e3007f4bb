//! Retry policy with exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::UploadError;

/// How transient failures of a single request are retried.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per request, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Deadline for one attempt; expiring counts as a transient failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after failed attempt `attempt` (1-based), with ±25%
    /// jitter so concurrent uploads do not retry in lockstep.
    ///
    /// Never exceeds `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let max = self.max_delay.as_secs_f64();
        let capped = secs.min(max);
        let jitter = capped * 0.25;
        let offset: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        let with_jitter = (capped + jitter * offset).clamp(0.0, max);
        Duration::from_secs_f64(with_jitter)
    }

    pub(crate) fn validate(&self) -> Result<(), UploadError> {
        if self.max_attempts == 0 {
            return Err(UploadError::InvalidConfiguration(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(UploadError::InvalidConfiguration(
                "attempt_timeout must be greater than zero".into(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(UploadError::InvalidConfiguration(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent.
///
/// Every attempt is bounded by `attempt_timeout`. `on_retry` is called with
/// the failed attempt number and its error before each backoff sleep.
/// Cancellation is checked before every attempt and interrupts the backoff;
/// it yields [`UploadError::UserCancelled`]. On exhaustion the last error is
/// returned unchanged.
pub(crate) async fn with_retry<T, F, Fut, R>(
    policy: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
    mut on_retry: R,
) -> Result<T, UploadError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
    R: FnMut(u32, &UploadError),
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(UploadError::UserCancelled);
        }
        attempt += 1;

        let err = match tokio::time::timeout(policy.attempt_timeout, op(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => UploadError::Timeout,
        };

        if !err.is_transient() || attempt >= policy.max_attempts {
            return Err(err);
        }

        on_retry(attempt, &err);
        let delay = policy.delay_for_attempt(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off: {err}");

        tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::UserCancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
