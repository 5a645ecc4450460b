//! Bounded retry with backoff, and the transient-error classifier.
//!
//! [`with_retry_if`] wraps any fallible async operation. The pool uses it to
//! create connections; callers may use it directly around their own queries.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5_000;

/// Retry behavior for [`with_retry`] and [`with_retry_if`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for exponential backoff.
    pub max_delay: Duration,
    /// Double the delay after every failed attempt.
    pub exponential: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            exponential: true,
        }
    }
}

impl RetryConfig {
    /// Create a retry configuration with the given attempt bound and defaults otherwise.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable exponential backoff.
    pub fn exponential(mut self, enabled: bool) -> Self {
        self.exponential = enabled;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << shift)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Run `op` with retries, treating every error as retryable.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    with_retry_if(config, |_: &E| true, op).await
}

/// Run `op` with retries while `is_retryable` accepts the error.
///
/// A rejected error is returned immediately. After the last attempt the most
/// recent error is returned unchanged.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) {
                    debug!(attempt, error = %err, "Error is not retryable, giving up");
                    return Err(err);
                }
                if attempt >= max_attempts {
                    debug!(attempt, error = %err, "Retry attempts exhausted");
                    return Err(err);
                }
                let delay = config.delay_for(attempt);
                debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Heuristic check for transient database failures by message text.
///
/// Matches connection refused/reset/closed/timeout, deadlocks, serialization
/// conflicts and connection-limit exhaustion. Everything else is treated as
/// permanent.
pub fn is_retryable_message(message: &str) -> bool {
    let msg = message.to_lowercase();

    if msg.contains("connection")
        && ["refused", "reset", "closed", "timeout"]
            .iter()
            .any(|needle| msg.contains(needle))
    {
        return true;
    }

    msg.contains("deadlock")
        || msg.contains("serialization failure")
        || msg.contains("could not serialize")
        || msg.contains("too many connections")
}

/// [`is_retryable_message`] applied to an error's display text.
pub fn is_retryable_error<E: Display + ?Sized>(err: &E) -> bool {
    is_retryable_message(&err.to_string())
}
