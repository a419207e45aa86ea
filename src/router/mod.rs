//! # Source Health Router
//!
//! Fallback orchestrator for engagement operations. For one logical unit of
//! work it walks the candidate sources in priority order, consulting the
//! circuit breaker and routing each attempt through the rate-limited queue,
//! and stops at the first success. Failures are classified: definitive
//! results end the pass immediately and never count against a breaker.
//!
//! The router never raises across its public boundary; both operations
//! return a typed success/failure outcome and callers schedule retries on
//! their next poll cycle.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cache::TieredCache;
use crate::config::{CacheConfig, EngageConfig, SourcesConfig};
use crate::ledger::{scoring, PointsLedger};
use crate::models::{Item, MonitoringState, NewItem};
use crate::queue::RateLimitedQueue;
use crate::resilience::CircuitBreakerManager;
use crate::sources::{
    AccountRef, EngagementResult, ItemRef, ItemSource, SourceError, SourceRegistry,
};
use crate::store::{CreditOutcome, EngagementStore};

/// How many recent external ids are consulted when deduplicating discovery.
const DEDUP_WINDOW: i64 = 200;

/// Failure outcome of a routed operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OperationFailure {
    #[error("no sources are configured and enabled")]
    NoSources,

    /// The content is definitively gone; no source can help and the
    /// reporting source's breaker was not incremented.
    #[error("definitive failure from {source_name}: {error}")]
    Definitive {
        source_name: String,
        error: SourceError,
    },

    /// Every candidate failed; carries the most informative error seen.
    #[error("all sources failed ({}): {error}", attempted.join(", "))]
    AllSourcesFailed {
        error: SourceError,
        attempted: Vec<String>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Successful discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub new_items: Vec<Item>,
    pub source: String,
    pub count: usize,
}

enum AttemptOutcome<T> {
    Success(T),
    Failure(SourceError),
    /// Breaker open or queue cleared; the source was not actually called.
    Skipped(Option<SourceError>),
}

pub struct SourceHealthRouter {
    registry: SourceRegistry,
    breakers: Arc<CircuitBreakerManager>,
    queue: Arc<RateLimitedQueue>,
    cache: Arc<TieredCache>,
    store: Arc<dyn EngagementStore>,
    ledger: Arc<PointsLedger>,
    sources_config: SourcesConfig,
    cache_config: CacheConfig,
}

impl SourceHealthRouter {
    pub fn new(
        registry: SourceRegistry,
        breakers: Arc<CircuitBreakerManager>,
        queue: Arc<RateLimitedQueue>,
        cache: Arc<TieredCache>,
        store: Arc<dyn EngagementStore>,
        ledger: Arc<PointsLedger>,
        config: &EngageConfig,
    ) -> Self {
        Self {
            registry,
            breakers,
            queue,
            cache,
            store,
            ledger,
            sources_config: config.sources.clone(),
            cache_config: config.cache.clone(),
        }
    }

    /// Fetch current engagement for one item, trying sources in priority
    /// order behind the cache. A stored item gets its counters and bonus
    /// score refreshed on success.
    pub async fn acquire_engagement(
        &self,
        item: &ItemRef,
    ) -> Result<EngagementResult, OperationFailure> {
        let cache_key = format!("engagement:{}", item.external_id);
        if let Some(cached) = self.cache.get_as::<EngagementResult>(&cache_key).await {
            debug!(external_id = %item.external_id, "engagement served from cache");
            return Ok(cached);
        }

        if self.registry.is_empty() {
            return Err(OperationFailure::NoSources);
        }

        let mut best_error: Option<SourceError> = None;
        let mut attempted = Vec::new();

        for source in self.registry.candidates() {
            let name = source.name().to_string();

            let outcome = {
                let src = Arc::clone(source);
                let item = item.clone();
                self.attempt(source, move || async move {
                    src.fetch_engagement(&item).await
                })
                .await
            };

            match outcome {
                AttemptOutcome::Success(counts) => {
                    let result = EngagementResult {
                        counts,
                        source: name.clone(),
                        fetched_at: Utc::now(),
                    };

                    if let Err(e) = self
                        .cache
                        .set(&cache_key, &result, self.cache_config.engagement_ttl())
                        .await
                    {
                        debug!(error = %e, "engagement result not cached");
                    }

                    self.refresh_stored_item(item, &result).await;

                    info!(external_id = %item.external_id, source = %name, "engagement acquired");
                    return Ok(result);
                }
                AttemptOutcome::Failure(error) if error.is_definitive() => {
                    self.record_failure_status(item.account_id, &error).await;
                    return Err(OperationFailure::Definitive {
                        source_name: name,
                        error,
                    });
                }
                AttemptOutcome::Failure(error) => {
                    attempted.push(name);
                    best_error = Some(prefer(best_error.take(), error));
                }
                AttemptOutcome::Skipped(error) => {
                    attempted.push(name);
                    if let Some(error) = error {
                        best_error = Some(prefer(best_error.take(), error));
                    }
                }
            }
        }

        let error =
            best_error.unwrap_or_else(|| SourceError::Transient("all sources skipped".into()));
        self.record_failure_status(item.account_id, &error).await;
        Err(OperationFailure::AllSourcesFailed { error, attempted })
    }

    /// Discover new items for an account, store the genuinely new ones, and
    /// credit each exactly once. Crediting is per item: a later failure does
    /// not roll back earlier credits.
    pub async fn discover_for_account(
        &self,
        account: &AccountRef,
    ) -> Result<DiscoveryResult, OperationFailure> {
        if self.registry.is_empty() {
            return Err(OperationFailure::NoSources);
        }

        let mut best_error: Option<SourceError> = None;
        let mut attempted = Vec::new();

        for source in self.registry.candidates() {
            let name = source.name().to_string();
            let kind = source.kind();

            let outcome = {
                let src = Arc::clone(source);
                let account = account.clone();
                self.attempt(source, move || async move { src.discover(&account).await })
                    .await
            };

            match outcome {
                AttemptOutcome::Success(discovered) => {
                    let result = self
                        .store_discovered(account, discovered, &name, kind.discovery_method())
                        .await?;
                    return Ok(result);
                }
                AttemptOutcome::Failure(error) if error.is_definitive() => {
                    self.record_failure_status(account.account_id, &error).await;
                    return Err(OperationFailure::Definitive {
                        source_name: name,
                        error,
                    });
                }
                AttemptOutcome::Failure(error) => {
                    attempted.push(name);
                    best_error = Some(prefer(best_error.take(), error));
                }
                AttemptOutcome::Skipped(error) => {
                    attempted.push(name);
                    if let Some(error) = error {
                        best_error = Some(prefer(best_error.take(), error));
                    }
                }
            }
        }

        let error =
            best_error.unwrap_or_else(|| SourceError::Transient("all sources skipped".into()));
        self.record_failure_status(account.account_id, &error).await;
        Err(OperationFailure::AllSourcesFailed { error, attempted })
    }

    /// One breaker-gated, queue-mediated, timeout-bounded call to a source.
    async fn attempt<T, F, Fut>(
        &self,
        source: &Arc<dyn ItemSource>,
        op: F,
    ) -> AttemptOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, SourceError>> + Send + 'static,
    {
        let name = source.name().to_string();

        if !self.breakers.try_acquire(&name).await {
            debug!(source = %name, "skipping source, circuit open");
            return AttemptOutcome::Skipped(None);
        }

        let settings = self.sources_config.settings_for(source.kind());
        let timeout = settings.request_timeout();

        let queued = self
            .queue
            .enqueue(&name, settings.min_spacing(), move || async move {
                match tokio::time::timeout(timeout, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Transient(format!(
                        "request timed out after {}s",
                        timeout.as_secs()
                    ))),
                }
            })
            .await;

        let result = match queued {
            Ok(result) => result,
            Err(queue_error) => {
                // The source was never called; no outcome to report, but a
                // claimed half-open trial must be handed back or the breaker
                // would short-circuit this source until a manual reset.
                self.breakers.release(&name).await;
                debug!(source = %name, error = %queue_error, "queued attempt abandoned");
                return AttemptOutcome::Skipped(Some(SourceError::Transient(
                    queue_error.to_string(),
                )));
            }
        };

        match result {
            Ok(value) => {
                self.breakers.report_success(&name).await;
                AttemptOutcome::Success(value)
            }
            Err(error) => {
                if error.counts_against_breaker() {
                    self.breakers.report_failure(&name).await;
                }
                warn!(source = %name, error = %error, "source attempt failed");
                AttemptOutcome::Failure(error)
            }
        }
    }

    /// Persist a successful discovery pass: dedup, store, credit, and leave
    /// the monitoring trail.
    async fn store_discovered(
        &self,
        account: &AccountRef,
        discovered: Vec<crate::sources::DiscoveredItem>,
        source_name: &str,
        discovery_method: &str,
    ) -> Result<DiscoveryResult, OperationFailure> {
        let mut seen: HashSet<String> = self
            .store
            .recent_external_ids(account.account_id, DEDUP_WINDOW)
            .await
            .map_err(|e| OperationFailure::Internal(e.to_string()))?
            .into_iter()
            .collect();

        let mut new_items = Vec::new();

        for candidate in discovered {
            if !seen.insert(candidate.external_id.clone()) {
                continue;
            }

            let breakdown = scoring::score(&candidate.counts, self.ledger.scoring());
            let new_item = NewItem {
                external_id: candidate.external_id,
                canonical_url: candidate.canonical_url,
                account_id: account.account_id,
                counts: candidate.counts,
                base_score: breakdown.base,
                bonus_score: breakdown.bonus,
                discovery_method: discovery_method.to_string(),
            };

            let item = match self.store.create_item_if_new(new_item).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    debug!("item already stored for this URL, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "failed to store discovered item");
                    continue;
                }
            };

            // Each credit is its own atomic unit; a failure here leaves the
            // item stored and the idempotency guard picks it up on a retry.
            match self.ledger.credit_discovery(&item).await {
                Ok(CreditOutcome::Credited(_)) | Ok(CreditOutcome::AlreadyCredited) => {}
                Err(e) => warn!(item_id = %item.id, error = %e, "discovery credit failed"),
            }

            new_items.push(item);
        }

        let count = new_items.len();
        if let Err(e) = self
            .store
            .record_monitoring(account.account_id, count as i64, MonitoringState::Active, None)
            .await
        {
            warn!(error = %e, "failed to record monitoring status");
        }
        if let Err(e) = self.store.touch_account_checked(account.account_id).await {
            warn!(error = %e, "failed to update account check counters");
        }

        info!(
            account = %account.username,
            source = source_name,
            new_items = count,
            "discovery pass stored"
        );

        Ok(DiscoveryResult {
            new_items,
            source: source_name.to_string(),
            count,
        })
    }

    async fn refresh_stored_item(&self, item: &ItemRef, result: &EngagementResult) {
        let Some(item_id) = item.item_id else {
            return;
        };

        let bonus = scoring::bonus(&result.counts, self.ledger.scoring());
        match self
            .store
            .update_item_engagement(item_id, &result.counts, bonus)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => debug!(item_id = %item_id, "refresh target item no longer present"),
            Err(e) => warn!(item_id = %item_id, error = %e, "failed to persist refresh"),
        }
    }

    async fn record_failure_status(&self, account_id: uuid::Uuid, error: &SourceError) {
        if let Err(e) = self
            .store
            .record_monitoring(
                account_id,
                0,
                MonitoringState::Error,
                Some(&error.to_string()),
            )
            .await
        {
            warn!(error = %e, "failed to record monitoring failure");
        }
    }
}

/// Keep the more informative of two errors from a fallback pass.
fn prefer(current: Option<SourceError>, candidate: SourceError) -> SourceError {
    match current {
        Some(current) if current.informativeness() >= candidate.informativeness() => current,
        _ => candidate,
    }
}
