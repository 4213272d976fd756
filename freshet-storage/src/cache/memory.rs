//! Process-local fast tier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use freshet_core::FreshetResult;
use tokio::time::Instant;

use super::traits::{pattern_matches, FastTier};

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// Hit/miss counters for a single tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

/// In-memory fast tier. Entries expire on read; there is no eviction.
///
/// Uses tokio's clock so paused-time tests can advance past a TTL.
#[derive(Debug, Default)]
pub struct InMemoryFastTier {
    entries: DashMap<String, StoredValue>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryFastTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl FastTier for InMemoryFastTier {
    async fn get(&self, key: &str) -> FreshetResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let found = match self.entries.get(key) {
            Some(stored) if stored.expires_at > now => Some(stored.bytes.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        match found {
            Some(bytes) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(bytes))
            }
            None => {
                self.entries.remove_if(key, |_, stored| stored.expires_at <= now);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> FreshetResult<()> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86400 * 365 * 30));
        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> FreshetResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn scan(&self, pattern: &str) -> FreshetResult<Vec<String>> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().expires_at > now && pattern_matches(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let tier = InMemoryFastTier::new();
        tier.set("a:b:c", b"hello".to_vec(), Duration::from_secs(60))
            .await
            .expect("set");
        assert_eq!(
            tier.get("a:b:c").await.expect("get"),
            Some(b"hello".to_vec())
        );
        assert!(tier.delete("a:b:c").await.expect("delete"));
        assert!(!tier.delete("a:b:c").await.expect("delete"));
        assert_eq!(tier.get("a:b:c").await.expect("get"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let tier = InMemoryFastTier::new();
        tier.set("a:b:c", b"x".to_vec(), Duration::from_secs(5))
            .await
            .expect("set");
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(tier.get("a:b:c").await.expect("get"), None);
        assert_eq!(tier.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let tier = InMemoryFastTier::new();
        tier.set("a:b:1", b"x".to_vec(), Duration::from_secs(1))
            .await
            .expect("set");
        tier.set("a:b:2", b"x".to_vec(), Duration::from_secs(100))
            .await
            .expect("set");
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(tier.purge_expired(), 1);
        assert_eq!(tier.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_scan_trailing_wildcard() {
        let tier = InMemoryFastTier::new();
        for key in ["dns:records:b.com", "dns:records:a.com", "http:headers:a.com"] {
            tier.set(key, b"x".to_vec(), Duration::from_secs(60))
                .await
                .expect("set");
        }
        let keys = tier.scan("dns:records:*").await.expect("scan");
        assert_eq!(keys, vec!["dns:records:a.com", "dns:records:b.com"]);
    }

    #[tokio::test]
    async fn test_stats_count_hits_and_misses() {
        let tier = InMemoryFastTier::new();
        tier.set("k", b"x".to_vec(), Duration::from_secs(60))
            .await
            .expect("set");
        let _ = tier.get("k").await;
        let _ = tier.get("missing").await;
        let stats = tier.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
