//! Tier traits and cacheable value marker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use freshet_core::{constants::KEY_WILDCARD, CacheKey, FreshetResult};
use serde::{de::DeserializeOwned, Serialize};

/// Marker trait for values that can pass through the tiered cache.
///
/// Values are shared between coalesced callers, so they must be `Clone`,
/// and stored as JSON, so they must round-trip through serde.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Short-lived key/value tier that expires entries on its own.
///
/// Implementations must tolerate concurrent writers from several processes;
/// last writer wins.
#[async_trait]
pub trait FastTier: Send + Sync {
    /// Raw bytes for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> FreshetResult<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> FreshetResult<()>;

    /// Remove `key`. Returns whether something was removed.
    async fn delete(&self, key: &str) -> FreshetResult<bool>;

    /// Live keys matching `pattern`.
    ///
    /// The only wildcard is a trailing `*`, which matches any remainder.
    /// A pattern without it matches a single key exactly.
    async fn scan(&self, pattern: &str) -> FreshetResult<Vec<String>>;
}

/// Second-level store consulted when the fast tier misses.
#[async_trait]
pub trait DurableTier<T: CacheValue>: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> FreshetResult<Option<T>>;

    /// Write-through after production. Only positive values are persisted.
    async fn persist(&self, key: &CacheKey, value: &T) -> FreshetResult<()>;
}

/// Match `key` against a scan pattern.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix(KEY_WILDCARD) {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

/// Statistics about tiered cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Definitive fast-tier hits.
    pub hits: u64,
    /// Fast-tier misses, indefinite entries included.
    pub misses: u64,
    pub durable_hits: u64,
    /// Producer invocations.
    pub productions: u64,
    /// Callers that joined an in-flight production instead of starting one.
    pub coalesced_waits: u64,
    /// Hits that were definitive negatives.
    pub negative_hits: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub durable_hits: AtomicU64,
    pub productions: AtomicU64,
    pub coalesced_waits: AtomicU64,
    pub negative_hits: AtomicU64,
}

impl CacheMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            productions: self.productions.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
        }
    }
}
