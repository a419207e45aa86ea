//! Registry of per-source circuit breakers with Postgres write-through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sqlx::PgPool;
use tracing::warn;

use crate::config::BreakerConfig;
use crate::models::breaker_state::BreakerStateRow;
use crate::resilience::circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitState};

/// Owns one independent breaker per source name.
///
/// When constructed with a pool, breaker state is loaded on first access and
/// written through after every report or override. Persistence failures are
/// logged and otherwise ignored: the in-memory breaker stays authoritative.
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
    pool: Option<PgPool>,
    persistence_warned: AtomicBool,
}

impl CircuitBreakerManager {
    pub fn new(config: BreakerConfig, pool: Option<PgPool>) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            pool,
            persistence_warned: AtomicBool::new(false),
        }
    }

    /// Get or create the breaker for a source, restoring persisted state on
    /// first access.
    pub async fn breaker(&self, source: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(source) {
            return existing.clone();
        }

        let created = Arc::new(CircuitBreaker::new(source.to_string(), self.config.clone()));

        if let Some(pool) = &self.pool {
            match BreakerStateRow::find_by_source(pool, source).await {
                Ok(Some(row)) => {
                    created
                        .restore(
                            CircuitState::parse(&row.state),
                            row.failure_count.max(0) as u32,
                            row.last_failure_at,
                            row.next_retry_at,
                            row.override_expires_at,
                        )
                        .await;
                }
                Ok(None) => {}
                Err(e) => self.warn_persistence(&e),
            }
        }

        // Two callers may race here; the first insert wins and both use it.
        self.breakers
            .entry(source.to_string())
            .or_insert(created)
            .clone()
    }

    /// Whether a call to this source may proceed right now.
    pub async fn try_acquire(&self, source: &str) -> bool {
        self.breaker(source).await.try_acquire().await
    }

    pub async fn report_success(&self, source: &str) {
        let breaker = self.breaker(source).await;
        breaker.record_success().await;
        self.persist(&breaker).await;
    }

    /// Release a half-open trial claimed by [`Self::try_acquire`] when the
    /// call was never made. No state transition, nothing to persist.
    pub async fn release(&self, source: &str) {
        self.breaker(source).await.release_trial().await;
    }

    pub async fn report_failure(&self, source: &str) {
        let breaker = self.breaker(source).await;
        breaker.record_failure().await;
        self.persist(&breaker).await;
    }

    pub async fn force_closed(&self, source: &str, duration: Option<Duration>) {
        let breaker = self.breaker(source).await;
        breaker.force_closed(duration).await;
        self.persist(&breaker).await;
    }

    pub async fn force_open(&self, source: &str) {
        let breaker = self.breaker(source).await;
        breaker.force_open().await;
        self.persist(&breaker).await;
    }

    pub async fn reset(&self, source: &str) {
        let breaker = self.breaker(source).await;
        breaker.reset().await;
        self.persist(&breaker).await;
    }

    /// Snapshot of every breaker created in this process.
    pub async fn all_metrics(&self) -> Vec<BreakerMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();

        let mut out = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            out.push(breaker.metrics().await);
        }
        out.sort_by(|a, b| a.source.cmp(&b.source));
        out
    }

    async fn persist(&self, breaker: &CircuitBreaker) {
        let Some(pool) = &self.pool else {
            return;
        };

        let m = breaker.metrics().await;
        if let Err(e) = BreakerStateRow::upsert(
            pool,
            &m.source,
            m.state.as_str(),
            m.consecutive_failures as i32,
            m.last_failure_at,
            m.next_retry_at,
            m.override_expires_at,
        )
        .await
        {
            self.warn_persistence(&e);
        }
    }

    fn warn_persistence(&self, error: &sqlx::Error) {
        if !self.persistence_warned.swap(true, Ordering::AcqRel) {
            warn!(%error, "breaker persistence unavailable, continuing in-memory only");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn breakers_are_independent_per_source() {
        let manager = CircuitBreakerManager::new(
            BreakerConfig {
                failure_threshold: 2,
                base_backoff_ms: 60_000,
                max_backoff_ms: 900_000,
            },
            None,
        );

        manager.report_failure("scraper").await;
        manager.report_failure("scraper").await;

        assert!(!manager.try_acquire("scraper").await);
        assert!(manager.try_acquire("shared-api").await);

        let metrics = manager.all_metrics().await;
        let scraper = metrics.iter().find(|m| m.source == "scraper").unwrap();
        let shared = metrics.iter().find(|m| m.source == "shared-api").unwrap();
        assert_eq!(scraper.state, CircuitState::Open);
        assert_eq!(shared.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn admin_overrides_round_trip() {
        let manager = CircuitBreakerManager::new(
            BreakerConfig {
                failure_threshold: 1,
                base_backoff_ms: 60_000,
                max_backoff_ms: 900_000,
            },
            None,
        );

        manager.report_failure("feed").await;
        assert!(!manager.try_acquire("feed").await);

        manager.reset("feed").await;
        assert!(manager.try_acquire("feed").await);

        manager.force_open("feed").await;
        assert!(!manager.try_acquire("feed").await);

        manager
            .force_closed("feed", Some(Duration::from_secs(60)))
            .await;
        assert!(manager.try_acquire("feed").await);
    }
}
