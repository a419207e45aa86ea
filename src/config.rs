//! # Configuration
//!
//! All tunables for the acquisition core in one serde tree. Every struct
//! carries `#[serde(default)]` so partial overrides work: defaults are
//! production-suitable, `for_test()` shrinks every interval for fast test
//! feedback, and `from_env()` layers `ENGAGE_`-prefixed environment variables
//! over the defaults (e.g. `ENGAGE_BREAKER__FAILURE_THRESHOLD=3`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngageError, Result};
use crate::sources::SourceKind;

/// Top-level configuration for the engagement core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngageConfig {
    pub sources: SourcesConfig,
    pub breaker: BreakerConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub scoring: ScoringConfig,
}

impl EngageConfig {
    /// Load configuration from the environment, layered over defaults.
    pub fn from_env() -> Result<Self> {
        let loaded = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("ENGAGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngageError::Configuration(e.to_string()))?;

        loaded
            .try_deserialize()
            .map_err(|e| EngageError::Configuration(e.to_string()))
    }

    /// Test configuration with rapid intervals.
    pub fn for_test() -> Self {
        Self {
            sources: SourcesConfig::for_test(),
            breaker: BreakerConfig {
                failure_threshold: 3,
                base_backoff_ms: 50,
                max_backoff_ms: 400,
            },
            queue: QueueConfig {
                cooldown_base_ms: 50,
                cooldown_max_ms: 400,
            },
            cache: CacheConfig {
                l1_max_entries: 10,
                l1_ttl_ceiling_secs: 60,
                promotion_ttl_secs: 5,
                sweep_interval_secs: 1,
                engagement_ttl_secs: 5,
            },
            scoring: ScoringConfig::default(),
        }
    }
}

/// Per-source settings: enablement, request timeout, and the minimum spacing
/// the rate-limited queue enforces between consecutive calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub enabled: bool,
    pub request_timeout_secs: u64,
    pub min_spacing_ms: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            request_timeout_secs: 15,
            min_spacing_ms: 2000,
        }
    }
}

impl SourceSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }
}

/// Settings for each of the four source categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub authenticated_api: SourceSettings,
    pub shared_api: SourceSettings,
    pub syndication_feed: SourceSettings,
    pub scraper: SourceSettings,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            authenticated_api: SourceSettings::default(),
            shared_api: SourceSettings::default(),
            syndication_feed: SourceSettings {
                request_timeout_secs: 10,
                ..SourceSettings::default()
            },
            // Scraping is slow; give it more room and wider spacing.
            scraper: SourceSettings {
                request_timeout_secs: 45,
                min_spacing_ms: 5000,
                ..SourceSettings::default()
            },
        }
    }
}

impl SourcesConfig {
    pub fn settings_for(&self, kind: SourceKind) -> &SourceSettings {
        match kind {
            SourceKind::AuthenticatedApi => &self.authenticated_api,
            SourceKind::SharedApi => &self.shared_api,
            SourceKind::SyndicationFeed => &self.syndication_feed,
            SourceKind::Scraper => &self.scraper,
        }
    }

    fn for_test() -> Self {
        let fast = SourceSettings {
            enabled: true,
            request_timeout_secs: 1,
            min_spacing_ms: 0,
        };
        Self {
            authenticated_api: fast.clone(),
            shared_api: fast.clone(),
            syndication_feed: fast.clone(),
            scraper: fast,
        }
    }
}

/// Circuit breaker thresholds shared by every per-source breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Backoff applied on the first open; doubles on each re-open.
    pub base_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_backoff_ms: 30_000,
            max_backoff_ms: 900_000,
        }
    }
}

impl BreakerConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Cooldown behavior when a source signals explicit throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Cooldown when the source gives no reset hint; doubles per repeat.
    pub cooldown_base_ms: u64,
    pub cooldown_max_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            cooldown_base_ms: 60_000,
            cooldown_max_ms: 900_000,
        }
    }
}

impl QueueConfig {
    pub fn cooldown_base(&self) -> Duration {
        Duration::from_millis(self.cooldown_base_ms)
    }

    pub fn cooldown_max(&self) -> Duration {
        Duration::from_millis(self.cooldown_max_ms)
    }
}

/// Tiered cache sizing and TTL policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub l1_max_entries: usize,
    /// Values with a TTL above this ceiling are written to L2 only.
    pub l1_ttl_ceiling_secs: u64,
    /// TTL clamp applied when promoting an L2 hit into L1.
    pub promotion_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// TTL for cached engagement results.
    pub engagement_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: 1000,
            l1_ttl_ceiling_secs: 3600,
            promotion_ttl_secs: 300,
            sweep_interval_secs: 60,
            engagement_ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn l1_ttl_ceiling(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_ceiling_secs)
    }

    pub fn promotion_ttl(&self) -> Duration {
        Duration::from_secs(self.promotion_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn engagement_ttl(&self) -> Duration {
        Duration::from_secs(self.engagement_ttl_secs)
    }
}

/// Per-metric weight/cap table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricTable {
    pub likes: i64,
    pub reposts: i64,
    pub replies: i64,
    pub quotes: i64,
    pub views: i64,
    pub bookmarks: i64,
}

impl Default for MetricTable {
    fn default() -> Self {
        Self {
            likes: 0,
            reposts: 0,
            replies: 0,
            quotes: 0,
            views: 0,
            bookmarks: 0,
        }
    }
}

/// Scoring weights and caps. Caps bound how much a single viral post can
/// farm out of one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Fixed score granted at item creation.
    pub base_score: i64,
    pub weights: MetricTable,
    pub caps: MetricTable,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: 5,
            weights: MetricTable {
                likes: 1,
                reposts: 3,
                replies: 2,
                quotes: 2,
                views: 0,
                bookmarks: 1,
            },
            caps: MetricTable {
                likes: 1000,
                reposts: 500,
                replies: 500,
                quotes: 500,
                views: 100_000,
                bookmarks: 500,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngageConfig::default();
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(cfg.cache.l1_max_entries, 1000);
        assert_eq!(cfg.queue.cooldown_base(), Duration::from_secs(60));
        assert_eq!(cfg.queue.cooldown_max(), Duration::from_secs(900));
        assert!(cfg.sources.scraper.request_timeout() > cfg.sources.shared_api.request_timeout());
    }

    #[test]
    fn partial_overrides_deserialize() {
        let cfg: EngageConfig =
            serde_json::from_str(r#"{"breaker": {"failure_threshold": 2}}"#).unwrap();
        assert_eq!(cfg.breaker.failure_threshold, 2);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.breaker.max_backoff(), Duration::from_secs(900));
        assert_eq!(cfg.scoring.base_score, 5);
    }
}
