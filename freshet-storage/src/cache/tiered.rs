//! Tiered cache-or-produce primitive.
//!
//! A lookup walks fast tier, then durable tier, then the producer. Every
//! step runs inside a single coalesced production per key, so concurrent
//! callers for the same key observe one producer execution.
//!
//! Failure policy:
//! - producer errors reach the caller unchanged and nothing is cached
//! - fast and durable tier errors are logged and treated as misses
//! - durable write-through is detached and never awaited by the caller

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use freshet_core::{CacheConfig, CacheKey, FreshetError, FreshetResult};
use futures_util::future::FutureExt;
use tracing::{debug, warn};

use super::entry::{CacheEntry, CacheLookup, Produced};
use super::inflight::{InFlightRegistry, Join};
use super::traits::{CacheMetrics, CacheStats, CacheValue, DurableTier, FastTier};

/// Per-call parameters for [`TieredCache::get_or_create`].
pub struct CacheRequest<T: CacheValue> {
    key: CacheKey,
    ttl: Duration,
    durable: Option<Arc<dyn DurableTier<T>>>,
}

impl<T: CacheValue> CacheRequest<T> {
    /// `ttl` is how long a fresh positive or negative result lives in the
    /// fast tier, unless the producer overrides it.
    pub fn new(key: CacheKey, ttl: Duration) -> Self {
        Self {
            key,
            ttl,
            durable: None,
        }
    }

    /// Consult and write through `tier` as the second level.
    pub fn with_durable(mut self, tier: Arc<dyn DurableTier<T>>) -> Self {
        self.durable = Some(tier);
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

struct Inner {
    fast: Arc<dyn FastTier>,
    in_flight: InFlightRegistry,
    config: CacheConfig,
    metrics: CacheMetrics,
}

/// Coalescing two-tier cache. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<Inner>,
}

impl TieredCache {
    pub fn new(fast: Arc<dyn FastTier>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                fast,
                in_flight: InFlightRegistry::new(config.in_flight_timeout),
                config,
                metrics: CacheMetrics::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn fast_tier(&self) -> &Arc<dyn FastTier> {
        &self.inner.fast
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.metrics.snapshot()
    }

    /// Number of keys with a production currently registered.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Return the cached result for the request key, producing it if needed.
    ///
    /// `produce` runs at most once per key at a time across every clone of
    /// this cache. Returning [`Produced::indefinite`] caches a short-lived
    /// placeholder that the next read ignores.
    pub async fn get_or_create<T, F, Fut>(
        &self,
        request: CacheRequest<T>,
        produce: F,
    ) -> FreshetResult<CacheLookup<T>>
    where
        T: CacheValue,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = FreshetResult<Produced<T>>> + Send + 'static,
    {
        let encoded = request.key.encode();
        let generation = self.inner.in_flight.next_generation();

        let inner = Arc::clone(&self.inner);
        let settle_key = encoded.clone();
        let work = async move {
            // A panicking producer must still release the slot, otherwise
            // every follower waits out the safety timer.
            let result = match AssertUnwindSafe(inner.lookup(request, produce))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(key = %settle_key, "Producer panicked");
                    Err(FreshetError::producer("producer panicked"))
                }
            };
            inner.in_flight.settle(&settle_key, generation);
            result
        }
        .boxed();

        match self.inner.in_flight.join::<T>(&encoded, generation, work) {
            Join::Leader(handle) => handle.await,
            Join::Follower(handle) => {
                CacheMetrics::incr(&self.inner.metrics.coalesced_waits);
                debug!(key = %encoded, "Joined in-flight production");
                handle.await
            }
            Join::Uncoalesced(work) => work.await,
        }
    }

    /// Read a definitive fast-tier entry without producing.
    pub async fn peek<T: CacheValue>(&self, key: &CacheKey) -> FreshetResult<Option<CacheLookup<T>>> {
        let encoded = key.encode();
        let Some(bytes) = self.inner.fast.get(&encoded).await? else {
            return Ok(None);
        };
        let entry = CacheEntry::<T>::from_bytes(&encoded, &bytes)?;
        if entry.is_expired(Utc::now()) {
            return Ok(None);
        }
        Ok(entry.into_lookup())
    }

    /// Drop the fast-tier entry for `key`.
    pub async fn invalidate(&self, key: &CacheKey) -> FreshetResult<bool> {
        self.inner.fast.delete(&key.encode()).await
    }

    /// Subjects with a live fast-tier entry under `namespace:category`.
    ///
    /// Keys that do not have exactly three segments, or whose fixed segments
    /// differ, are discarded.
    pub async fn scan_subjects(&self, namespace: &str, category: &str) -> FreshetResult<Vec<String>> {
        let pattern = CacheKey::scan_pattern(namespace, category)?;
        let keys = self.inner.fast.scan(&pattern).await?;
        Ok(keys
            .iter()
            .filter_map(|raw| {
                let subject = CacheKey::parse_subject(raw, namespace, category);
                if subject.is_none() {
                    debug!(key = %raw, "Discarding malformed scan match");
                }
                subject
            })
            .collect())
    }
}

impl Inner {
    async fn lookup<T, F, Fut>(
        &self,
        request: CacheRequest<T>,
        produce: F,
    ) -> FreshetResult<CacheLookup<T>>
    where
        T: CacheValue,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = FreshetResult<Produced<T>>> + Send + 'static,
    {
        let encoded = request.key.encode();

        if let Some(lookup) = self.read_fast::<T>(&encoded).await {
            CacheMetrics::incr(&self.metrics.hits);
            if lookup.is_not_found() {
                CacheMetrics::incr(&self.metrics.negative_hits);
            }
            return Ok(lookup);
        }
        CacheMetrics::incr(&self.metrics.misses);

        if let Some(durable) = &request.durable {
            match durable.fetch(&request.key).await {
                Ok(Some(value)) => {
                    CacheMetrics::incr(&self.metrics.durable_hits);
                    let entry = CacheEntry::positive(&encoded, value.clone(), Utc::now(), request.ttl);
                    // Promotion is fire-and-forget.
                    let _ = self.spawn_fast_write(entry, request.ttl);
                    return Ok(CacheLookup::Value(value));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %encoded, error = %e, "Durable tier read failed, treating as miss");
                }
            }
        }

        CacheMetrics::incr(&self.metrics.productions);
        let (value, not_found, ttl_override) = produce().await?.into_parts();
        let now = Utc::now();

        let (entry, ttl, lookup) = match value {
            Some(value) => {
                let ttl = ttl_override.unwrap_or(request.ttl);
                if let Some(durable) = request.durable.clone() {
                    self.spawn_persist(durable, request.key.clone(), value.clone());
                }
                (
                    CacheEntry::positive(&encoded, value.clone(), now, ttl),
                    ttl,
                    CacheLookup::Value(value),
                )
            }
            None if not_found => {
                let ttl = ttl_override.unwrap_or(request.ttl);
                (CacheEntry::negative(&encoded, now, ttl), ttl, CacheLookup::NotFound)
            }
            None => {
                let ttl = self.config.indefinite_ttl;
                (CacheEntry::indefinite(&encoded, now, ttl), ttl, CacheLookup::Unavailable)
            }
        };

        if let Some(write) = self.spawn_fast_write(entry, ttl) {
            if tokio::time::timeout(self.config.fast_write_timeout, write)
                .await
                .is_err()
            {
                debug!(
                    key = %encoded,
                    "Fast tier write still pending, returning without waiting"
                );
            }
        }

        Ok(lookup)
    }

    /// Definitive, unexpired fast-tier entry for `key`. Errors count as a miss.
    async fn read_fast<T: CacheValue>(&self, key: &str) -> Option<CacheLookup<T>> {
        let bytes = match self.fast.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Fast tier read failed, treating as miss");
                return None;
            }
        };

        let entry = match CacheEntry::<T>::from_bytes(key, &bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Undecodable fast tier entry, treating as miss");
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            return None;
        }
        let lookup = entry.into_lookup();
        if lookup.is_none() {
            debug!(key = %key, "Indefinite entry, producing again");
        }
        lookup
    }

    /// Write `entry` into the fast tier on a detached task.
    ///
    /// Returns the task handle so a caller may wait on it for a bounded time.
    fn spawn_fast_write<T: CacheValue>(
        &self,
        entry: CacheEntry<T>,
        ttl: Duration,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let bytes = match entry.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Failed to encode cache entry");
                return None;
            }
        };
        let fast = Arc::clone(&self.fast);
        let key = entry.key;
        Some(tokio::spawn(async move {
            if let Err(e) = fast.set(&key, bytes, ttl).await {
                warn!(key = %key, error = %e, "Fast tier write failed");
            }
        }))
    }

    fn spawn_persist<T: CacheValue>(
        &self,
        durable: Arc<dyn DurableTier<T>>,
        key: CacheKey,
        value: T,
    ) {
        tokio::spawn(async move {
            if let Err(e) = durable.persist(&key, &value).await {
                warn!(key = %key, error = %e, "Durable tier write failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryFastTier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> TieredCache {
        TieredCache::new(Arc::new(InMemoryFastTier::new()), CacheConfig::default())
    }

    fn key(subject: &str) -> CacheKey {
        CacheKey::new("test", "values", subject).expect("valid key")
    }

    #[tokio::test]
    async fn test_produces_then_hits() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let lookup = cache
                .get_or_create(CacheRequest::new(key("a"), Duration::from_secs(60)), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Produced::found(42u32))
                })
                .await
                .expect("lookup");
            assert_eq!(lookup, CacheLookup::Value(42));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.productions, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_producer_error_propagates_and_is_not_cached() {
        let cache = cache();
        let err = cache
            .get_or_create(CacheRequest::<u32>::new(key("b"), Duration::from_secs(60)), || async {
                Err(freshet_core::FreshetError::producer("upstream down"))
            })
            .await
            .unwrap_err();
        assert_eq!(err, freshet_core::FreshetError::producer("upstream down"));

        let lookup = cache
            .get_or_create(CacheRequest::new(key("b"), Duration::from_secs(60)), || async {
                Ok(Produced::found(1u32))
            })
            .await
            .expect("lookup");
        assert_eq!(lookup, CacheLookup::Value(1));
    }

    #[tokio::test]
    async fn test_panicking_producer_releases_slot() {
        let cache = cache();
        let err = cache
            .get_or_create(CacheRequest::<u32>::new(key("p"), Duration::from_secs(60)), || async {
                let value: Option<u32> = None;
                Ok(Produced::found(value.expect("producer bug")))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FreshetError::Producer { .. }));
        assert_eq!(cache.in_flight(), 0);

        let lookup = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_create(CacheRequest::new(key("p"), Duration::from_secs(60)), || async {
                Ok(Produced::found(2u32))
            }),
        )
        .await
        .expect("not stuck behind the panicked producer")
        .expect("lookup");
        assert_eq!(lookup, CacheLookup::Value(2));
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_followers_of_panicking_producer_see_error() {
        let cache = cache();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_create(CacheRequest::<u32>::new(key("q"), Duration::from_secs(60)), move || async move {
                        let _ = gate.await;
                        let value: Option<u32> = None;
                        Ok(Produced::found(value.expect("producer bug")))
                    })
                    .await
            })
        };
        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_create(CacheRequest::<u32>::new(key("q"), Duration::from_secs(60)), || async {
                        Ok(Produced::found(3u32))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        let _ = release.send(());

        let leader = leader.await.expect("leader task");
        let follower = tokio::time::timeout(Duration::from_secs(1), follower)
            .await
            .expect("follower released")
            .expect("follower task");
        assert!(matches!(leader, Err(FreshetError::Producer { .. })));
        assert!(follower.is_err() || follower == Ok(CacheLookup::Value(3)));
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_indefinite_is_reproduced() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in [CacheLookup::Unavailable, CacheLookup::Unavailable] {
            let calls = Arc::clone(&calls);
            let lookup = cache
                .get_or_create(CacheRequest::<u32>::new(key("c"), Duration::from_secs(60)), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Produced::indefinite())
                })
                .await
                .expect("lookup");
            assert_eq!(lookup, expected);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_peek_and_invalidate() {
        let cache = cache();
        cache
            .get_or_create(CacheRequest::new(key("d"), Duration::from_secs(60)), || async {
                Ok(Produced::found("v".to_string()))
            })
            .await
            .expect("lookup");

        let peeked = cache.peek::<String>(&key("d")).await.expect("peek");
        assert_eq!(peeked, Some(CacheLookup::Value("v".to_string())));

        assert!(cache.invalidate(&key("d")).await.expect("invalidate"));
        assert_eq!(cache.peek::<String>(&key("d")).await.expect("peek"), None);
    }

    #[tokio::test]
    async fn test_scan_subjects() {
        let cache = cache();
        for subject in ["x.com", "y.com"] {
            cache
                .get_or_create(CacheRequest::new(key(subject), Duration::from_secs(60)), || async {
                    Ok(Produced::found(1u32))
                })
                .await
                .expect("lookup");
        }
        cache
            .fast_tier()
            .set("test:values:bad:extra", b"{}".to_vec(), Duration::from_secs(60))
            .await
            .expect("set");

        let subjects = cache.scan_subjects("test", "values").await.expect("scan");
        assert_eq!(subjects, vec!["x.com".to_string(), "y.com".to_string()]);
    }
}
