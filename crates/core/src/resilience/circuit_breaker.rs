//! Circuit breaker guarding calls into a named dependency
//!
//! Three states. CLOSED passes calls through and counts failures; at
//! `failure_threshold` the breaker trips to OPEN. OPEN rejects every call
//! without touching the dependency until `reset_timeout` has elapsed since
//! the last failure, then the next call runs as a HALF_OPEN trial. A trial
//! success closes the breaker; `half_open_max_attempts` trial failures
//! (default 1) re-open it.
//!
//! A success while CLOSED only clears the failure count once
//! `monitoring_period` has passed since the last failure, so one lucky call
//! inside a failure burst does not erase the streak.
//!
//! Breakers are process-local and do not coordinate across replicas.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// State and Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Tripped, calls rejected without reaching the dependency
    Open,
    /// Probing whether the dependency recovered
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    /// How long OPEN rejects calls before allowing a trial
    pub reset_timeout: Duration,
    /// Window within which a lone success does not clear the failure count
    pub monitoring_period: Duration,
    /// Trial failures tolerated while HALF_OPEN before re-opening
    pub half_open_max_attempts: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
            half_open_max_attempts: 1,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BreakerConfigError {
    #[error("failure_threshold must be at least 1")]
    ThresholdTooLow,
    #[error("reset_timeout must be at least 100ms")]
    ResetTimeoutTooShort,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E>
where
    E: std::error::Error,
{
    /// Rejected without invoking the operation
    #[error("circuit breaker {name} is OPEN")]
    Open { name: String },
    /// The operation ran and failed
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E>
where
    E: std::error::Error,
{
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    half_open_attempts: u32,
    last_failure: Option<Instant>,
}

/// Point-in-time view of a breaker, for diagnostics and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_attempts: u32,
    pub last_failure_age: Option<Duration>,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
    ) -> Result<Self, BreakerConfigError> {
        if config.failure_threshold < 1 {
            return Err(BreakerConfigError::ThresholdTooLow);
        }
        if config.reset_timeout < Duration::from_millis(100) {
            return Err(BreakerConfigError::ResetTimeoutTooShort);
        }
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_attempts: 0,
                last_failure: None,
            }),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` under breaker protection.
    ///
    /// The lock is only held while inspecting and updating counters, never
    /// across the awaited operation.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        self.before_call()?;

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Current state, applying the OPEN to HALF_OPEN timeout transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        Self::maybe_enter_half_open(&self.name, &self.config, &mut inner);
        inner.state
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.inner.lock();
        Self::maybe_enter_half_open(&self.name, &self.config, &mut inner);
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_attempts: inner.half_open_attempts,
            last_failure_age: inner.last_failure.map(|at| at.elapsed()),
        }
    }

    /// Force the breaker back to CLOSED and clear all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.half_open_attempts = 0;
        inner.last_failure = None;
    }

    fn before_call<E>(&self) -> Result<(), BreakerError<E>>
    where
        E: std::error::Error,
    {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            if !Self::maybe_enter_half_open(&self.name, &self.config, &mut inner) {
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "trial call succeeded, closing circuit");
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.half_open_attempts = 0;
            }
            _ => {
                // A streak only clears once the monitoring window has passed
                let window_elapsed = inner
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.config.monitoring_period);
                if window_elapsed {
                    inner.failure_count = 0;
                }
            }
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_attempts += 1;
            let max_attempts = self.config.half_open_max_attempts.max(1);
            if inner.half_open_attempts >= max_attempts {
                warn!(breaker = %self.name, "trial call failed, re-opening circuit");
                inner.state = CircuitState::Open;
                inner.half_open_attempts = 0;
            }
        } else if inner.failure_count >= self.config.failure_threshold {
            warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                "failure threshold reached, opening circuit"
            );
            inner.state = CircuitState::Open;
        }
    }

    /// Returns true when the breaker is (now) accepting calls.
    fn maybe_enter_half_open(
        name: &str,
        config: &BreakerConfig,
        inner: &mut BreakerState,
    ) -> bool {
        if inner.state != CircuitState::Open {
            return true;
        }
        let timeout_elapsed = inner
            .last_failure
            .is_none_or(|at| at.elapsed() >= config.reset_timeout);
        if timeout_elapsed {
            debug!(breaker = %name, "reset timeout elapsed, entering half-open");
            inner.state = CircuitState::HalfOpen;
            inner.half_open_attempts = 0;
            return true;
        }
        false
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
