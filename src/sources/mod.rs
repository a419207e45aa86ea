//! # Engagement Sources
//!
//! Abstractions over the upstream systems engagement data comes from. Each
//! deployment registers concrete [`ItemSource`] implementations (an
//! account-scoped authenticated API client, a shared-credential client, a
//! syndication feed reader, a scraper); the router only ever sees the trait
//! and the normalized shapes defined here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SourcesConfig;

/// The four source categories, in fallback priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    AuthenticatedApi,
    SharedApi,
    SyndicationFeed,
    Scraper,
}

impl SourceKind {
    /// Lower sorts first in the fallback pass.
    pub fn priority(self) -> u8 {
        match self {
            SourceKind::AuthenticatedApi => 0,
            SourceKind::SharedApi => 1,
            SourceKind::SyndicationFeed => 2,
            SourceKind::Scraper => 3,
        }
    }

    /// Discovery-method tag recorded on items found through this source.
    pub fn discovery_method(self) -> &'static str {
        match self {
            SourceKind::AuthenticatedApi | SourceKind::SharedApi => "auto-api",
            SourceKind::SyndicationFeed => "auto-feed",
            SourceKind::Scraper => "auto-scrape",
        }
    }
}

/// Failure taxonomy for source operations.
///
/// `ContentRemoved` is definitive: the content is gone, no other source can
/// help, and it does not count against the source's circuit breaker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("rate limited{}", reset_hint(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("content removed or never existed")]
    ContentRemoved,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

fn reset_hint(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => format!(" (reset at {at})"),
        None => String::new(),
    }
}

impl SourceError {
    /// Definitive errors cannot be helped by retrying another source.
    pub fn is_definitive(&self) -> bool {
        matches!(self, SourceError::ContentRemoved)
    }

    /// Everything except a definitive result counts toward the breaker.
    pub fn counts_against_breaker(&self) -> bool {
        !self.is_definitive()
    }

    /// Ranking used to pick the most informative error from a failed
    /// fallback pass. Higher wins.
    pub fn informativeness(&self) -> u8 {
        match self {
            SourceError::ContentRemoved => 4,
            SourceError::Unauthorized(_) => 3,
            SourceError::RateLimited { .. } => 2,
            SourceError::InvalidResponse(_) => 1,
            SourceError::Transient(_) => 0,
        }
    }
}

/// Normalized engagement counters, shared by items, snapshots, and scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounts {
    pub likes: i64,
    pub reposts: i64,
    pub replies: i64,
    pub quotes: i64,
    pub views: i64,
    pub bookmarks: i64,
}

/// Result of a successful engagement acquisition, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementResult {
    #[serde(flatten)]
    pub counts: EngagementCounts,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// A post reported by a discovery pass, before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredItem {
    pub external_id: String,
    pub canonical_url: String,
    pub counts: EngagementCounts,
}

/// What a source needs to refresh engagement for one stored item.
#[derive(Debug, Clone)]
pub struct ItemRef {
    /// Set when the item is already stored; refreshes write back through it.
    pub item_id: Option<Uuid>,
    pub account_id: Uuid,
    pub external_id: String,
    pub canonical_url: String,
}

/// What a source needs to discover new items for one account.
#[derive(Debug, Clone)]
pub struct AccountRef {
    pub account_id: Uuid,
    pub external_id: String,
    pub username: String,
}

/// One upstream engagement source.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Stable name, also the circuit breaker and queue key.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Fetch current engagement counters for one item.
    async fn fetch_engagement(&self, item: &ItemRef) -> Result<EngagementCounts, SourceError>;

    /// Discover items for an account, newest first.
    async fn discover(&self, account: &AccountRef) -> Result<Vec<DiscoveredItem>, SourceError>;
}

/// The ordered, config-filtered candidate list the router iterates.
#[derive(Clone)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn ItemSource>>,
}

impl SourceRegistry {
    /// Order registered sources by kind priority and drop disabled ones.
    pub fn new(mut sources: Vec<Arc<dyn ItemSource>>, config: &SourcesConfig) -> Self {
        sources.retain(|s| config.settings_for(s.kind()).enabled);
        sources.sort_by_key(|s| s.kind().priority());
        Self { sources }
    }

    pub fn candidates(&self) -> &[Arc<dyn ItemSource>] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, SourceKind);

    #[async_trait]
    impl ItemSource for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn kind(&self) -> SourceKind {
            self.1
        }

        async fn fetch_engagement(&self, _: &ItemRef) -> Result<EngagementCounts, SourceError> {
            Ok(EngagementCounts::default())
        }

        async fn discover(&self, _: &AccountRef) -> Result<Vec<DiscoveredItem>, SourceError> {
            Ok(vec![])
        }
    }

    #[test]
    fn registry_orders_by_priority_and_filters_disabled() {
        let mut config = SourcesConfig::default();
        config.syndication_feed.enabled = false;

        let registry = SourceRegistry::new(
            vec![
                Arc::new(Named("scraper", SourceKind::Scraper)),
                Arc::new(Named("feed", SourceKind::SyndicationFeed)),
                Arc::new(Named("auth", SourceKind::AuthenticatedApi)),
                Arc::new(Named("shared", SourceKind::SharedApi)),
            ],
            &config,
        );

        let names: Vec<&str> = registry.candidates().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["auth", "shared", "scraper"]);
    }

    #[test]
    fn definitive_errors_do_not_count_against_breaker() {
        assert!(!SourceError::ContentRemoved.counts_against_breaker());
        assert!(SourceError::RateLimited { reset_at: None }.counts_against_breaker());
        assert!(SourceError::Transient("timeout".into()).counts_against_breaker());
        assert!(
            SourceError::ContentRemoved.informativeness()
                > SourceError::Transient("t".into()).informativeness()
        );
    }
}
