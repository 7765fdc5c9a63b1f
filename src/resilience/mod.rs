//! Resilience primitives applied around every provider call.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Per-provider Closed/Open/HalfOpen state machine |
//! | [`rate_limiter`] | Fixed-window budgets plus a concurrency gate |
//! | [`retry`] | Bounded re-attempts of one provider with per-attempt timeout |
//!
//! Admission checks return lightweight rejection values rather than errors;
//! the orchestrator turns them into aggregate entries and moves on.
//!
//! ```rust
//! use provider_failover::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_cooldown(Duration::from_secs(30)),
//! );
//!
//! if let Ok(permit) = breaker.try_acquire() {
//!     // Call the provider...
//!     permit.success();
//! };
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitOpenRejection,
    CircuitPermit, CircuitState,
};
pub use rate_limiter::{LimitKind, RateLimitRejection, RateLimiter, RateLimiterSnapshot, RatePermit};
pub use retry::{Backoff, RetryOutcome, RetryPolicy};
