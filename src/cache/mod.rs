//! # Tiered Cache
//!
//! Bounded in-process L1 over a durable remote L2. L1 absorbs hot reads with
//! an approximate LRU/LFU eviction; L2 survives process restarts. L2 outages
//! degrade the tier to L1-only instead of surfacing errors to callers.

pub mod remote;
pub mod tiered;

pub use remote::{CacheError, PgCacheStore, RemoteCache};
pub use tiered::{CacheStats, TieredCache};
