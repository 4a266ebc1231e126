//! In-process resilience primitives for calls into flaky dependencies
//!
//! [`retry`] absorbs transient failures with bounded backoff;
//! [`circuit_breaker`] stops hammering a dependency that keeps failing;
//! [`registry`] shares breakers across call sites by dependency name.
//! Compose them retry-innermost, breaker-outermost.

pub mod circuit_breaker;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    BreakerConfig, BreakerConfigError, BreakerError, BreakerStats, CircuitBreaker, CircuitState,
};
pub use registry::BreakerRegistry;
pub use retry::{Backoff, RetryError, RetryPolicy, is_transient, retry, retry_if};
