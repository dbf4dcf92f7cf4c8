//! Exponential backoff with full jitter, and a generic retry loop built on it
//!
//! Both pieces are independent of the pool: [`BackoffPolicy::delay`] is a pure
//! function of the attempt number and [`retry_with_backoff`] only needs an
//! operation, a cancellation check and a retry predicate.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub starting_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Wait a uniformly random fraction of the computed delay
    pub full_jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            starting_delay: Duration::from_millis(300),
            multiplier: 2.0,
            max_delay: Duration::from_millis(30_000),
            full_jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Unjittered delay before zero-based `attempt`:
    /// `min(starting_delay * multiplier^attempt, max_delay)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.starting_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_nanos() as f64);

        // Float-to-int casts saturate, so huge exponents land on the cap above.
        Duration::from_nanos(capped as u64)
    }

    /// Delay actually waited before `attempt`
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if self.full_jitter {
            full_jitter(delay)
        } else {
            delay
        }
    }
}

/// Uniformly random duration in `[0, delay)`
pub fn full_jitter(delay: Duration) -> Duration {
    delay.mul_f64(fastrand::f64())
}

/// How a retry loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    /// Cancelled, or the retry predicate refused the last error
    Aborted { attempts: u32 },
    Exhausted { attempts: u32, last_error: Option<E> },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Aborted { attempts }
            | RetryOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }
}

/// Run `operation` until it succeeds, the policy is exhausted, or the loop is aborted
///
/// The backoff delay is applied before every attempt, the first included.
/// `is_cancelled` is checked before and after each delay; `should_retry` is
/// consulted after each failure.
pub async fn retry_with_backoff<T, E, Op, Fut, C, R>(
    policy: &BackoffPolicy,
    is_cancelled: C,
    should_retry: R,
    mut operation: Op,
) -> RetryOutcome<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn() -> bool,
    R: Fn(&E) -> bool,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        if is_cancelled() {
            return RetryOutcome::Aborted { attempts: attempt };
        }

        let delay = policy.jittered_delay(attempt);
        trace!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before attempt");
        tokio::time::sleep(delay).await;

        if is_cancelled() {
            return RetryOutcome::Aborted { attempts: attempt };
        }

        match operation(attempt).await {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt + 1,
                }
            }
            Err(error) => {
                if !should_retry(&error) {
                    debug!(attempt, "Retry predicate declined, aborting");
                    return RetryOutcome::Aborted {
                        attempts: attempt + 1,
                    };
                }
                last_error = Some(error);
            }
        }
    }

    RetryOutcome::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    }
}
