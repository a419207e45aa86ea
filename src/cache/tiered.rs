//! Two-tier cache implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::remote::{CacheError, RemoteCache};
use crate::config::CacheConfig;

struct L1Entry {
    value: serde_json::Value,
    expires_at_ms: u64,
    access_count: AtomicU64,
    last_access_ms: AtomicU64,
}

/// Snapshot of cache state for observability.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub l1_entries: usize,
    pub l1_max_entries: usize,
    pub l2_configured: bool,
    pub l2_degraded: bool,
}

/// Bounded L1 over an optional remote L2.
///
/// Construct once at process start and share by `Arc`; tests construct
/// isolated instances with their own remote (or none).
pub struct TieredCache {
    l1: DashMap<String, L1Entry>,
    l2: Option<Arc<dyn RemoteCache>>,
    config: CacheConfig,
    /// Sticky for the process lifetime once an L2 operation fails.
    l2_degraded: AtomicBool,
    started: Instant,
}

impl TieredCache {
    pub fn new(config: CacheConfig, l2: Option<Arc<dyn RemoteCache>>) -> Self {
        Self {
            l1: DashMap::new(),
            l2,
            config,
            l2_degraded: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Read through L1 then L2. An L2 hit is promoted into L1 with a TTL
    /// clamped to the promotion ceiling regardless of the original TTL.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = self.now_ms();

        let expired = match self.l1.get(key) {
            Some(entry) => {
                if entry.expires_at_ms > now {
                    entry.access_count.fetch_add(1, Ordering::Relaxed);
                    entry.last_access_ms.store(now, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.l1.remove(key);
        }

        let l2 = self.l2.as_ref()?;
        if self.l2_degraded.load(Ordering::Acquire) {
            return None;
        }

        match l2.get(key).await {
            Ok(Some(value)) => {
                self.insert_l1(key, value.clone(), self.config.promotion_ttl());
                debug!(key, "cache: promoted L2 hit into L1");
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                self.degrade(&e);
                None
            }
        }
    }

    /// Typed read.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        serde_json::from_value(value).ok()
    }

    /// Write to L2 always (when configured and healthy) and to L1 only when
    /// the TTL is at or below the L1 ceiling. Values that fail the
    /// serialization sanity check are rejected before any tier is touched.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_value(value)
            .map_err(|e| CacheError::Rejected(format!("not serializable: {e}")))?;

        if is_placeholder(&json) {
            return Err(CacheError::Rejected(
                "serializes to an empty or placeholder form".to_string(),
            ));
        }

        if let Some(l2) = &self.l2 {
            if !self.l2_degraded.load(Ordering::Acquire) {
                if let Err(e) = l2.set(key, &json, ttl).await {
                    self.degrade(&e);
                }
            }
        }

        if ttl <= self.config.l1_ttl_ceiling() {
            self.insert_l1(key, json, ttl);
        }

        Ok(())
    }

    pub async fn delete(&self, key: &str) {
        self.l1.remove(key);

        if let Some(l2) = &self.l2 {
            if !self.l2_degraded.load(Ordering::Acquire) {
                if let Err(e) = l2.delete(key).await {
                    self.degrade(&e);
                }
            }
        }
    }

    fn insert_l1(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let now = self.now_ms();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        if !self.l1.contains_key(key) && self.l1.len() >= self.config.l1_max_entries {
            self.evict_one();
        }

        self.l1.insert(
            key.to_string(),
            L1Entry {
                value,
                expires_at_ms: now.saturating_add(ttl_ms),
                access_count: AtomicU64::new(0),
                last_access_ms: AtomicU64::new(now),
            },
        );
    }

    /// Evict the entry with the lowest (access count, last access) pair:
    /// among the least-accessed entries, the least recently used one goes.
    fn evict_one(&self) {
        let mut victim: Option<(String, u64, u64)> = None;

        for entry in self.l1.iter() {
            let accesses = entry.access_count.load(Ordering::Relaxed);
            let last_access = entry.last_access_ms.load(Ordering::Relaxed);
            let better = match &victim {
                None => true,
                Some((_, v_accesses, v_last)) => {
                    (accesses, last_access) < (*v_accesses, *v_last)
                }
            };
            if better {
                victim = Some((entry.key().clone(), accesses, last_access));
            }
        }

        if let Some((key, accesses, _)) = victim {
            debug!(key = %key, accesses, "cache: evicting L1 entry");
            self.l1.remove(&key);
        }
    }

    /// Drop expired L1 entries. Also runs on the sweeper interval.
    pub fn sweep_expired(&self) -> usize {
        let now = self.now_ms();
        let before = self.l1.len();
        self.l1.retain(|_, entry| entry.expires_at_ms > now);
        before - self.l1.len()
    }

    /// Start the background sweep task. The caller owns the handle and its
    /// lifecycle.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let evicted = cache.sweep_expired();
                if evicted > 0 {
                    debug!(evicted, "cache: swept expired L1 entries");
                }
            }
        })
    }

    fn degrade(&self, error: &CacheError) {
        if !self.l2_degraded.swap(true, Ordering::AcqRel) {
            warn!(%error, "cache: L2 unavailable, degrading to L1-only for process lifetime");
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.l2_degraded.load(Ordering::Acquire)
    }

    /// Re-enable L2 after an operator has resolved the outage.
    pub fn reset_degraded(&self) {
        if self.l2_degraded.swap(false, Ordering::AcqRel) {
            info!("cache: L2 re-enabled by explicit reset");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_entries: self.l1.len(),
            l1_max_entries: self.config.l1_max_entries,
            l2_configured: self.l2.is_some(),
            l2_degraded: self.is_degraded(),
        }
    }
}

fn is_placeholder(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
