//! Retry utilities for resilient operations
//!
//! This module provides an exponential backoff policy bounded by a total
//! elapsed-time budget. Callers pass an observer that is invoked with the error
//! and the upcoming wait after every failed attempt, so retry telemetry stays
//! with the caller instead of inside the policy.

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Wait before the first retry
    pub initial_interval: Duration,

    /// Cap on any single wait
    pub max_interval: Duration,

    /// Growth factor applied after every retry
    pub multiplier: f64,

    /// Jitter applied to each wait, as a fraction of it (0.0 disables jitter)
    pub randomization_factor: f64,

    /// Total time budget across all attempts; `None` retries forever
    pub max_elapsed_time: Option<Duration>,

    /// Optional cap on the number of retries
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_elapsed_time: Some(Duration::from_secs(15 * 60)),
            max_retries: None,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom intervals and elapsed budget
    pub fn new(initial_interval: Duration, max_interval: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            max_elapsed_time: Some(max_elapsed),
            ..Default::default()
        }
    }

    /// Set the multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter fraction
    pub fn with_randomization(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Cap the number of retries
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Calculate the un-jittered wait before retry number `retry` (1-based)
    fn calculate_delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponential =
            self.initial_interval.as_secs_f64() * self.multiplier.powi((retry - 1) as i32);
        let capped = exponential.min(self.max_interval.as_secs_f64());

        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Apply jitter in `[delay * (1 - f), delay * (1 + f)]`
    fn jitter(&self, delay: Duration) -> Duration {
        if self.randomization_factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        let delta = delay.as_secs_f64() * self.randomization_factor;
        let low = delay.as_secs_f64() - delta;
        let high = delay.as_secs_f64() + delta;
        let secs = rand::thread_rng().gen_range(low..=high);

        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Returned when an operation could not be completed within the policy
#[derive(Debug)]
pub struct RetryError<E> {
    /// Total attempts made, including the first
    pub attempts: u32,

    /// Wall time spent, including waits
    pub elapsed: Duration,

    /// Whether the last error was classified as non-retryable
    pub permanent: bool,

    /// The error returned by the last attempt
    pub last_error: E,
}

impl<E> RetryError<E> {
    /// Discard the retry bookkeeping and return the last error
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.permanent {
            write!(f, "non-retryable error: {}", self.last_error)
        } else {
            write!(
                f,
                "retry budget exhausted after {} attempts in {:.1}s: {}",
                self.attempts,
                self.elapsed.as_secs_f64(),
                self.last_error
            )
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

/// Execute an operation with exponential backoff, notifying on each failure
///
/// `notify` receives the error and the wait before the next attempt. It is not
/// called for the final failure that exhausts the budget.
///
/// # Example
///
/// ```no_run
/// use seqharvest::utils::retry::{with_retry_notify, RetryPolicy};
///
/// # async fn example() {
/// let policy = RetryPolicy::default();
/// let result = with_retry_notify(
///     &policy,
///     || async { Ok::<_, std::io::Error>(42) },
///     |err, wait| tracing::warn!(error = %err, ?wait, "retrying"),
/// )
/// .await;
/// assert_eq!(result.unwrap(), 42);
/// # }
/// ```
pub async fn with_retry_notify<T, E, F, Fut, N>(
    policy: &RetryPolicy,
    operation: F,
    notify: N,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(&E, Duration),
{
    with_retry_if(policy, operation, |_| true, notify).await
}

/// Execute an operation with retry logic, using a custom retry predicate
///
/// Errors for which `should_retry` returns false end the loop immediately with
/// a `RetryError` marked `permanent`.
pub async fn with_retry_if<T, E, F, Fut, P, N>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
    mut notify: N,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    N: FnMut(&E, Duration),
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let error = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !should_retry(&error) {
            return Err(RetryError {
                attempts,
                elapsed: started.elapsed(),
                permanent: true,
                last_error: error,
            });
        }

        let retries_left = policy.max_retries.map_or(true, |max| attempts <= max);
        let wait = policy.jitter(policy.calculate_delay(attempts));
        let within_budget = policy
            .max_elapsed_time
            .map_or(true, |max| started.elapsed() + wait <= max);

        if !retries_left || !within_budget {
            return Err(RetryError {
                attempts,
                elapsed: started.elapsed(),
                permanent: false,
                last_error: error,
            });
        }

        notify(&error, wait);
        tokio::time::sleep(wait).await;
    }
}
