//! # Core Bootstrap
//!
//! Explicit wiring of the acquisition services, constructed once at process
//! start and shared by handle. There is no hidden module-level state; tests
//! build isolated instances of the underlying services directly.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::cache::{PgCacheStore, TieredCache};
use crate::config::EngageConfig;
use crate::error::{EngageError, Result};
use crate::ledger::{ConsistencyAuditor, ConsistencyReport, PointsLedger, SyncSummary};
use crate::models::Item;
use crate::queue::{QueueMetrics, RateLimitedQueue};
use crate::resilience::{BreakerMetrics, CircuitBreakerManager};
use crate::router::{DiscoveryResult, OperationFailure, SourceHealthRouter};
use crate::sources::{AccountRef, EngagementResult, ItemRef, ItemSource, SourceRegistry};
use crate::store::{CreditOutcome, PgEngagementStore, PgLedgerStore, RepairOutcome};

/// The engagement acquisition and consistency core, fully wired.
pub struct EngageCore {
    router: SourceHealthRouter,
    breakers: Arc<CircuitBreakerManager>,
    queue: Arc<RateLimitedQueue>,
    cache: Arc<TieredCache>,
    ledger: Arc<PointsLedger>,
    auditor: ConsistencyAuditor,
    store: Arc<PgEngagementStore>,
    sweeper: JoinHandle<()>,
}

impl EngageCore {
    /// Wire the core against a database pool and the deployment's registered
    /// sources. Spawns the cache sweeper; [`EngageCore::shutdown`] stops it.
    pub fn new(pool: PgPool, config: EngageConfig, sources: Vec<Arc<dyn ItemSource>>) -> Self {
        let cache = Arc::new(TieredCache::new(
            config.cache.clone(),
            Some(Arc::new(PgCacheStore::new(pool.clone()))),
        ));
        let sweeper = cache.spawn_sweeper();

        let breakers = Arc::new(CircuitBreakerManager::new(
            config.breaker.clone(),
            Some(pool.clone()),
        ));
        let queue = Arc::new(RateLimitedQueue::new(config.queue.clone()));

        let store = Arc::new(PgEngagementStore::new(pool.clone()));
        let ledger_store = Arc::new(PgLedgerStore::new(pool.clone()));
        let ledger = Arc::new(PointsLedger::new(
            ledger_store.clone(),
            config.scoring.clone(),
        ));
        let auditor = ConsistencyAuditor::new(ledger_store);

        let registry = SourceRegistry::new(sources, &config.sources);
        let router = SourceHealthRouter::new(
            registry,
            Arc::clone(&breakers),
            Arc::clone(&queue),
            Arc::clone(&cache),
            store.clone(),
            Arc::clone(&ledger),
            &config,
        );

        info!("engagement core initialized");

        Self {
            router,
            breakers,
            queue,
            cache,
            ledger,
            auditor,
            store,
            sweeper,
        }
    }

    pub async fn acquire_engagement(
        &self,
        item: &ItemRef,
    ) -> std::result::Result<EngagementResult, OperationFailure> {
        self.router.acquire_engagement(item).await
    }

    pub async fn discover_for_account(
        &self,
        account: &AccountRef,
    ) -> std::result::Result<DiscoveryResult, OperationFailure> {
        self.router.discover_for_account(account).await
    }

    /// Idempotent manual credit for one item.
    pub async fn credit_account(&self, item_id: Uuid, reason: &str) -> Result<CreditOutcome> {
        use crate::store::EngagementStore;

        let item: Item = self
            .store
            .find_item(item_id)
            .await?
            .ok_or(EngageError::ItemNotFound(item_id))?;

        self.ledger.credit(&item, reason).await
    }

    pub async fn audit_account(&self, account_id: Uuid) -> Result<ConsistencyReport> {
        self.auditor.verify_consistency(account_id).await
    }

    pub async fn repair_account(&self, account_id: Uuid) -> Result<RepairOutcome> {
        self.auditor.repair(account_id).await
    }

    /// Batch verification and repair; administrative use.
    pub async fn sync_all(&self) -> Result<SyncSummary> {
        self.auditor.sync_all().await
    }

    /// Per-source breaker state for the operator surface.
    pub async fn source_health(&self) -> Vec<BreakerMetrics> {
        self.breakers.all_metrics().await
    }

    pub fn queue_metrics(&self) -> Vec<QueueMetrics> {
        self.queue.metrics()
    }

    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    // Administrative controls.

    pub async fn force_breaker_closed(&self, source: &str, duration: Option<Duration>) {
        self.breakers.force_closed(source, duration).await;
    }

    pub async fn force_breaker_open(&self, source: &str) {
        self.breakers.force_open(source).await;
    }

    pub async fn reset_breaker(&self, source: &str) {
        self.breakers.reset(source).await;
    }

    /// Discard all pending queue operations; in-flight calls finish.
    pub fn clear_queue(&self) -> usize {
        self.queue.clear_queue()
    }

    /// Re-enable the L2 cache after an operator resolved an outage.
    pub fn reset_cache_degradation(&self) {
        self.cache.reset_degraded();
    }

    /// Stop background tasks: the cache sweeper and every source queue
    /// worker. Pending queue operations are abandoned.
    pub fn shutdown(&self) {
        self.sweeper.abort();
        self.queue.shutdown();
    }
}

impl Drop for EngageCore {
    fn drop(&mut self) {
        self.sweeper.abort();
        self.queue.shutdown();
    }
}
