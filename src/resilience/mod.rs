//! # Resilience
//!
//! Per-source circuit breakers that stop the core from hammering a failing
//! upstream. Each named source gets an independent breaker with
//! closed/open/half-open states, exponential reopen backoff, and manual
//! operator overrides. State is written through to Postgres on every
//! transition so it survives process restarts.

pub mod circuit_breaker;
pub mod manager;

pub use circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitState};
pub use manager::CircuitBreakerManager;
