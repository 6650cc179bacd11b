//! Retry policy for transient history fetch failures

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::Result;

/// Configuration for bounded retries
///
/// Supports exponential backoff with jitter to avoid thundering herd.
///
/// # Example
///
/// ```
/// use slackline_core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(3)
///     .with_initial_interval(Duration::from_millis(500))
///     .with_max_interval(Duration::from_secs(4));
///
/// assert!(policy.has_attempts_remaining(2));
/// assert!(!policy.has_attempts_remaining(3));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Initial delay before first retry
    pub initial_interval: Duration,

    /// Maximum delay between retries
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) to add randomness
    ///
    /// A value of 0.1 means +/-10% randomness.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Create an exponential backoff retry policy with defaults suited to a
    /// chat webhook (the reply should land within seconds)
    ///
    /// - 3 max attempts
    /// - 500 ms initial interval
    /// - 4 second max interval
    /// - 2x backoff coefficient
    /// - 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(4),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a given attempt number (1-based)
    ///
    /// Returns the duration to wait before the attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1;
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + jitter_offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted. The last error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let delay = self.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.has_attempts_remaining(attempt) => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "retrying after transient failure"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
