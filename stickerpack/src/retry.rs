//! Retry policy and deadline handling for object storage calls.
//!
//! Only network-facing calls (asset fetch, archive upload) are retried.
//! Image processing is deterministic and is never wrapped in a retry.
//!
//! # Example
//!
//! ```ignore
//! use stickerpack::retry::RetryPolicy;
//!
//! // Three attempts with exponential backoff
//! let retry_policy = RetryPolicy::exponential(3);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::storage::StorageError;

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default number of attempts for storage calls.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How a storage call handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail immediately on error.
    None,

    /// Fixed number of retries with constant delay between attempts.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between retry attempts.
        delay: Duration,
    },

    /// Exponential backoff with configurable parameters.
    ///
    /// The delay is multiplied after each failed attempt, up to a maximum.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Initial delay after the first failure.
        initial_delay: Duration,
        /// Maximum delay cap (delay won't exceed this).
        max_delay: Duration,
        /// Multiplier applied to delay after each failure (typically 2.0).
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Creates an exponential backoff policy with default delays.
    ///
    /// Uses:
    /// - Initial delay: 100ms ([`DEFAULT_INITIAL_DELAY_MS`])
    /// - Max delay: 30 seconds ([`DEFAULT_MAX_DELAY_SECS`])
    /// - Multiplier: 2.0 ([`DEFAULT_BACKOFF_MULTIPLIER`])
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Creates a fixed retry policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Calculates the delay before retry number `attempt` (1-based).
    ///
    /// Returns `None` when no more retries are allowed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => {
                if attempt < *max_attempts {
                    Some(*delay)
                } else {
                    None
                }
            }
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt < *max_attempts {
                    let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                    let delay_ms = initial_delay.as_millis() as f64 * factor;
                    let capped = delay_ms.min(max_delay.as_millis() as f64) as u64;
                    Some(Duration::from_millis(capped).min(*max_delay))
                } else {
                    None
                }
            }
        }
    }

    /// Returns the maximum number of attempts for this policy.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// The last attempt failed, or the failure was not retryable.
    Storage { error: StorageError, attempts: u32 },
    /// The pipeline was cancelled while the call was in flight.
    Cancelled,
}

/// Run a storage call under `policy`, bounding every attempt by `deadline`.
///
/// An attempt that exceeds the deadline counts as a retryable timeout.
/// Cancellation is observed both during attempts and during backoff sleeps.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Duration,
    cancel: &CancellationToken,
    bucket: &str,
    key: &str,
    mut op: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt: u32 = 1;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            result = tokio::time::timeout(deadline, op()) => result,
        };

        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(_) => StorageError::Timeout {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
        };

        let delay = if error.is_retryable() {
            policy.delay_for_attempt(attempt)
        } else {
            None
        };

        match delay {
            Some(delay) => {
                tracing::debug!(
                    bucket,
                    key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Storage call failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CallError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            None => {
                return Err(CallError::Storage {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}
