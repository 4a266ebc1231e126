//! Bounded retry with configurable backoff
//!
//! Re-executes a fallible async operation up to `max_attempts` times.
//! Delays between attempts follow the configured backoff shape, capped at
//! `max_delay`, with optional plus-or-minus 10% jitter so replicas do not
//! retry in lockstep. A predicate decides which errors are worth retrying;
//! anything else propagates immediately. No delay follows the final
//! attempt.
//!
//! When a call needs both retry and a circuit breaker, compose retry
//! innermost so transient blips are absorbed before they count against the
//! breaker's failure budget.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

// ============================================================================
// Policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Every delay equals `initial_delay`
    Fixed,
    /// Delay grows by `initial_delay` per attempt
    Linear,
    /// Delay multiplies by `multiplier` per attempt
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub backoff: Backoff,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            backoff: Backoff::Exponential,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Pre-jitter delay after the given 1-based attempt, capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_millis() as f64;
        let raw = match self.backoff {
            Backoff::Fixed => initial,
            Backoff::Linear => initial * attempt as f64,
            Backoff::Exponential => initial * self.multiplier.powi(attempt.saturating_sub(1) as i32),
        };
        let capped = raw.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let ms = delay.as_millis() as f64;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * 0.1 * ms;
        Duration::from_millis((ms + jitter).max(0.0) as u64)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error,
{
    /// Every allowed attempt ran and failed
    #[error("operation failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
    /// The first failing error was not retryable
    #[error(transparent)]
    NotRetryable(E),
}

impl<E> RetryError<E>
where
    E: std::error::Error,
{
    /// The underlying operation error, whichever way the retry ended.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NotRetryable(e) => e,
        }
    }
}

/// Default retryable test: network-ish failure text.
pub fn is_transient<E>(error: &E) -> bool
where
    E: std::fmt::Display,
{
    let message = error.to_string().to_lowercase();
    message.contains("timeout")
        || message.contains("network")
        || message.contains("connection")
        || message.contains("econnrefused")
        || message.contains("etimedout")
        || message.contains("eai_again")
}

// ============================================================================
// Execution
// ============================================================================

/// Retry `op` per `policy`, treating [`is_transient`] errors as retryable.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error,
{
    retry_if(policy, is_transient, op).await
}

/// Retry `op` per `policy`, consulting `retryable` on each failure.
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    retryable: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !retryable(&e) => {
                debug!(error = %e, "error not retryable, propagating");
                return Err(RetryError::NotRetryable(e));
            }
            Err(e) if attempt >= max_attempts => {
                warn!(attempts = max_attempts, error = %e, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: max_attempts,
                    last: e,
                });
            }
            Err(e) => {
                let delay = policy.jittered(policy.delay_for_attempt(attempt));
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
