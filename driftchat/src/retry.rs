//! Generic retry wrapper with exponential backoff, jitter, and
//! failure classification.
//!
//! Transient failures (flaky network, 5xx, timeouts) are retried with
//! exponentially growing, jittered delays; permanent failures (bad auth,
//! validation, most 4xx) short-circuit immediately, since retrying them
//! would only mask the real problem from the user. Unclassified errors
//! default to transient, favoring availability over silent data loss.

use std::time::Duration;

use rand::Rng;

use crate::backend::WriteError;

/// Retry budget and backoff schedule for one logical operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub retries: u32,
    /// Base delay; also the jitter range added to each wait.
    pub base_delay: Duration,
    /// Upper bound on any single wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Pre-jitter delay before retry `attempt` (0-indexed):
    /// `min(base * 2^attempt, max)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered delay before retry `attempt`:
    /// `min(base * 2^attempt + random(0, base), max)`. Additive jitter
    /// spreads out clients that failed at the same moment.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(Duration::ZERO..=self.base_delay);
        (self.delay_for_attempt(attempt) + jitter).min(self.max_delay)
    }
}

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The same request may succeed later; retry with backoff.
    Transient,
    /// Retrying can never succeed; surface to the caller now.
    Permanent,
}

/// Classifies a write failure as transient or permanent.
///
/// HTTP 408 (request timeout) and 429 (rate limit) are the only 4xx
/// statuses treated as transient. [`WriteError::Other`] falls back to
/// message heuristics and defaults to transient.
#[must_use]
pub fn classify(error: &WriteError) -> ErrorClass {
    match error {
        WriteError::Timeout
        | WriteError::Dns(_)
        | WriteError::ConnectionReset(_)
        | WriteError::Offline => ErrorClass::Transient,
        WriteError::AuthExpired(_) | WriteError::Unauthorized(_) | WriteError::Validation(_) => {
            ErrorClass::Permanent
        }
        WriteError::Http { status, .. } => match status {
            408 | 429 | 500..=599 => ErrorClass::Transient,
            400..=499 => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        },
        WriteError::Other(message) => classify_message(message),
    }
}

/// Heuristic classification for errors that only carry a message string.
fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    const PERMANENT_MARKERS: [&str; 7] = [
        "jwt",
        "token expired",
        "invalid token",
        "unauthorized",
        "forbidden",
        "validation",
        "malformed",
    ];
    if PERMANENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        ErrorClass::Permanent
    } else {
        ErrorClass::Transient
    }
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// The operation failed with a non-retryable error on some attempt.
    #[error("permanent failure: {0}")]
    Permanent(#[source] WriteError),

    /// Every attempt in the retry budget failed with a transient error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Total attempts made (1 initial + retries).
        attempts: u32,
        /// The last transient error observed.
        #[source]
        last: WriteError,
    },
}

/// Runs `operation` under the policy, retrying transient failures with
/// jittered exponential backoff.
///
/// `on_retry(attempt, error)` fires before each backoff wait (attempt is
/// 0-indexed), letting the caller surface "retrying…" status to the UI.
///
/// # Errors
///
/// Returns [`RetryError::Permanent`] as soon as a failure classifies as
/// permanent, or [`RetryError::Exhausted`] wrapping the last transient
/// error once the budget is spent.
pub async fn with_retry<T, F, Fut, N>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: N,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WriteError>>,
    N: FnMut(u32, &WriteError),
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if classify(&error) == ErrorClass::Permanent {
                    tracing::warn!(error = %error, "permanent failure, not retrying");
                    return Err(RetryError::Permanent(error));
                }
                if attempt >= policy.retries {
                    tracing::warn!(
                        attempts = attempt + 1,
                        error = %error,
                        "retry budget exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: error,
                    });
                }

                let delay = policy.jittered_delay(attempt);
                tracing::debug!(
                    attempt,
                    max_retries = policy.retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "transient failure, backing off"
                );
                on_retry(attempt, &error);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
