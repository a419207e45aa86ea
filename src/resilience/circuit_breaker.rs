//! Circuit breaker for a single upstream source.
//!
//! Classic three-state breaker: Closed (requests pass), Open (fail fast until
//! the retry deadline), Half-Open (exactly one trial request probes
//! recovery). A failed trial reopens with doubled backoff up to a cap.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed = 0,
    /// Failing fast, calls are short-circuited until the retry deadline.
    Open = 1,
    /// One trial call allowed to test recovery.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            // Unknown values land in the safest state.
            _ => CircuitState::Open,
        }
    }
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "open" => CircuitState::Open,
            "half_open" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Read-only snapshot of breaker state for observability and persistence.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    pub source: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub override_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    consecutive_failures: u32,
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
    last_failure_at: Option<DateTime<Utc>>,
    next_retry_at: Option<Instant>,
    /// Backoff applied on the next open; doubles after each failed trial.
    current_backoff: Duration,
    trial_in_flight: bool,
    override_until: Option<Instant>,
}

/// Breaker for one named source. Breakers never share state.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: BreakerConfig) -> Self {
        debug!(
            source = %name,
            failure_threshold = config.failure_threshold,
            "circuit breaker initialized"
        );

        let base = config.base_backoff();
        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                total_calls: 0,
                success_count: 0,
                failure_count: 0,
                last_failure_at: None,
                next_retry_at: None,
                current_backoff: base,
                trial_in_flight: false,
                override_until: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether a call may proceed right now. Moving Open past its retry
    /// deadline claims the single half-open trial slot, so exactly one of
    /// several racing callers wins the probe.
    pub async fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if let Some(until) = inner.override_until {
            if now < until {
                return true;
            }
            debug!(source = %self.name, "circuit breaker override expired");
            inner.override_until = None;
        }

        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => match inner.next_retry_at {
                Some(at) if now >= at => {
                    self.state
                        .store(CircuitState::HalfOpen as u8, Ordering::Release);
                    inner.trial_in_flight = true;
                    info!(source = %self.name, "circuit breaker half-open, allowing one trial");
                    true
                }
                Some(_) => false,
                None => {
                    warn!(source = %self.name, "circuit open without retry deadline, allowing call");
                    true
                }
            },
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call against this source.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.total_calls += 1;
        inner.success_count += 1;

        match self.state() {
            CircuitState::HalfOpen => {
                inner.consecutive_failures = 0;
                inner.current_backoff = self.config.base_backoff();
                inner.trial_in_flight = false;
                inner.next_retry_at = None;
                self.state
                    .store(CircuitState::Closed as u8, Ordering::Release);
                info!(source = %self.name, "circuit breaker closed after successful trial");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {
                warn!(source = %self.name, "success recorded while circuit open");
            }
        }
    }

    /// Record a failed call against this source.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.total_calls += 1;
        inner.failure_count += 1;
        inner.last_failure_at = Some(Utc::now());

        match self.state() {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.current_backoff = std::cmp::min(
                    inner.current_backoff.saturating_mul(2),
                    self.config.max_backoff(),
                );
                self.open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Release a claimed half-open trial slot without recording an outcome.
    /// For callers that acquired the slot but never actually made the call;
    /// the next caller may claim the trial immediately.
    pub async fn release_trial(&self) {
        let mut inner = self.inner.lock().await;
        if self.state() == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.trial_in_flight = false;
            debug!(source = %self.name, "half-open trial released without an outcome");
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.next_retry_at = Some(Instant::now() + inner.current_backoff);
        inner.trial_in_flight = false;
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        warn!(
            source = %self.name,
            consecutive_failures = inner.consecutive_failures,
            backoff_ms = inner.current_backoff.as_millis() as u64,
            "circuit breaker opened"
        );
    }

    /// Operator override: force the breaker closed. With a duration, failure
    /// tracking is bypassed until the override expires.
    pub async fn force_closed(&self, duration: Option<Duration>) {
        let mut inner = self.inner.lock().await;
        inner.trial_in_flight = false;
        inner.next_retry_at = None;
        inner.override_until = duration.map(|d| Instant::now() + d);
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        warn!(source = %self.name, override_secs = duration.map(|d| d.as_secs()), "circuit breaker forced closed");
    }

    /// Operator override: force the breaker open immediately.
    pub async fn force_open(&self) {
        let mut inner = self.inner.lock().await;
        inner.override_until = None;
        warn!(source = %self.name, "circuit breaker forced open");
        self.open(&mut inner);
    }

    /// Return to a fresh closed state with zero failures.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        inner.current_backoff = self.config.base_backoff();
        inner.trial_in_flight = false;
        inner.next_retry_at = None;
        inner.override_until = None;
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        info!(source = %self.name, "circuit breaker reset");
    }

    /// Side-effect-free snapshot of current state.
    pub async fn metrics(&self) -> BreakerMetrics {
        let inner = self.inner.lock().await;
        let now = Instant::now();

        BreakerMetrics {
            source: self.name.clone(),
            state: self.state(),
            consecutive_failures: inner.consecutive_failures,
            total_calls: inner.total_calls,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            next_retry_at: inner.next_retry_at.map(|at| wall_clock(now, at)),
            override_expires_at: inner.override_until.map(|at| wall_clock(now, at)),
        }
    }

    /// Restore state persisted by a previous process.
    pub(crate) async fn restore(
        &self,
        state: CircuitState,
        consecutive_failures: u32,
        last_failure_at: Option<DateTime<Utc>>,
        next_retry_at: Option<DateTime<Utc>>,
        override_expires_at: Option<DateTime<Utc>>,
    ) {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        inner.consecutive_failures = consecutive_failures;
        inner.last_failure_at = last_failure_at;
        inner.next_retry_at = next_retry_at.and_then(|at| instant_from_wall(now, at));
        inner.override_until = override_expires_at.and_then(|at| instant_from_wall(now, at));
        inner.trial_in_flight = false;

        // A persisted half-open becomes an open breaker whose deadline has
        // passed: the next caller claims the trial.
        let restored = match state {
            CircuitState::HalfOpen => {
                inner.next_retry_at = Some(Instant::now());
                CircuitState::Open
            }
            CircuitState::Open if inner.next_retry_at.is_none() => {
                inner.next_retry_at = Some(Instant::now());
                CircuitState::Open
            }
            other => other,
        };
        self.state.store(restored as u8, Ordering::Release);

        info!(
            source = %self.name,
            state = restored.as_str(),
            consecutive_failures,
            "circuit breaker state restored"
        );
    }
}

fn wall_clock(now: Instant, at: Instant) -> DateTime<Utc> {
    if at > now {
        Utc::now() + chrono::Duration::from_std(at - now).unwrap_or_default()
    } else {
        Utc::now()
    }
}

fn instant_from_wall(now: DateTime<Utc>, at: DateTime<Utc>) -> Option<Instant> {
    if at <= now {
        return None;
    }
    (at - now).to_std().ok().map(|d| Instant::now() + d)
}
