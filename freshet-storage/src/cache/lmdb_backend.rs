//! LMDB-backed fast tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped fast tier that survives process restarts.
//!
//! # Value Format
//!
//! Each value is stored as `[expires_at millis: 8 bytes LE][payload]`.
//! Expired values are reported as absent and deleted lazily on read or by
//! [`LmdbFastTier::purge_expired`].

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use freshet_core::{chrono_duration, FreshetError, FreshetResult, StorageError, Tier};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::memory::TierStats;
use super::traits::{pattern_matches, FastTier};

/// Error type for LMDB tier operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbTierError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Corrupt value: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbTierError> for FreshetError {
    fn from(e: LmdbTierError) -> Self {
        FreshetError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

const HEADER_LEN: usize = 8;

/// LMDB-backed fast tier.
pub struct LmdbFastTier {
    env: Env,
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LmdbFastTier {
    /// Open (or create) a tier in `path` with a map of `max_size_mb`.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbTierError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbTierError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbTierError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn stats(&self) -> TierStats {
        let entries = self
            .env
            .read_txn()
            .ok()
            .and_then(|rtxn| self.db.len(&rtxn).ok())
            .unwrap_or(0);
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }

    /// Delete every expired value. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbTierError> {
        let now = Utc::now().timestamp_millis();
        let expired: Vec<Vec<u8>> = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;
            let keys = iter
                .filter_map(Result::ok)
                .filter(|(_, bytes)| is_expired(bytes, now))
                .map(|(key, _)| key.to_vec())
                .collect();
            keys
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;
        let mut deleted = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }
        wtxn.commit()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    fn delete_key(&self, key: &[u8]) -> Result<bool, LmdbTierError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;
        let deleted = self
            .db
            .delete(&mut wtxn, key)
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;
        Ok(deleted)
    }
}

fn expires_at_millis(bytes: &[u8]) -> Option<i64> {
    let header: [u8; HEADER_LEN] = bytes.get(0..HEADER_LEN)?.try_into().ok()?;
    Some(i64::from_le_bytes(header))
}

fn is_expired(bytes: &[u8], now_millis: i64) -> bool {
    expires_at_millis(bytes).map_or(true, |expires| expires <= now_millis)
}

#[async_trait]
impl FastTier for LmdbFastTier {
    async fn get(&self, key: &str) -> FreshetResult<Option<Vec<u8>>> {
        let now = Utc::now().timestamp_millis();
        let found = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;
            let stored = self
                .db
                .get(&rtxn, key.as_bytes())
                .map_err(|e| StorageError::ReadFailed {
                    tier: Tier::Fast,
                    key: key.to_string(),
                    reason: e.to_string(),
                })?
                .map(|bytes| bytes.to_vec());
            stored
        };

        match found {
            Some(bytes) if !is_expired(&bytes, now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(bytes[HEADER_LEN..].to_vec()))
            }
            Some(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.delete_key(key.as_bytes()) {
                    tracing::debug!(key = %key, error = %e, "Failed to drop expired LMDB entry");
                }
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> FreshetResult<()> {
        let expires_at = Utc::now()
            .checked_add_signed(chrono_duration(ttl))
            .map(|at| at.timestamp_millis())
            .unwrap_or(i64::MAX);

        let mut full_bytes = Vec::with_capacity(HEADER_LEN + value.len());
        full_bytes.extend_from_slice(&expires_at.to_le_bytes());
        full_bytes.extend_from_slice(&value);

        let write_failed = |reason: String| StorageError::WriteFailed {
            tier: Tier::Fast,
            key: key.to_string(),
            reason,
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| write_failed(e.to_string()))?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &full_bytes)
            .map_err(|e| write_failed(e.to_string()))?;
        wtxn.commit().map_err(|e| write_failed(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> FreshetResult<bool> {
        Ok(self.delete_key(key.as_bytes())?)
    }

    async fn scan(&self, pattern: &str) -> FreshetResult<Vec<String>> {
        let now = Utc::now().timestamp_millis();
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;
        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbTierError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        for result in iter {
            let Ok((key, bytes)) = result else {
                continue;
            };
            if is_expired(bytes, now) {
                continue;
            }
            // Non-UTF-8 keys were not written by this tier.
            let Ok(key) = std::str::from_utf8(key) else {
                continue;
            };
            if pattern_matches(pattern, key) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_tier() -> (LmdbFastTier, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let tier = LmdbFastTier::new(temp_dir.path(), 10).expect("tier creation should succeed");
        (tier, temp_dir)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (tier, _dir) = create_test_tier();
        tier.set("dns:records:example.com", b"{}".to_vec(), Duration::from_secs(60))
            .await
            .expect("set should succeed");
        let value = tier
            .get("dns:records:example.com")
            .await
            .expect("get should succeed");
        assert_eq!(value, Some(b"{}".to_vec()));
        assert_eq!(tier.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let (tier, _dir) = create_test_tier();
        assert_eq!(tier.get("nope").await.expect("get should succeed"), None);
        assert_eq!(tier.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_expired_value_is_absent_and_dropped() {
        let (tier, _dir) = create_test_tier();
        tier.set("k", b"x".to_vec(), Duration::ZERO)
            .await
            .expect("set should succeed");
        assert_eq!(tier.get("k").await.expect("get should succeed"), None);
        assert_eq!(tier.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let (tier, _dir) = create_test_tier();
        tier.set("k", b"x".to_vec(), Duration::from_secs(60))
            .await
            .expect("set should succeed");
        assert!(tier.delete("k").await.expect("delete should succeed"));
        assert!(!tier.delete("k").await.expect("delete should succeed"));
    }

    #[tokio::test]
    async fn test_scan_skips_expired_and_other_categories() {
        let (tier, _dir) = create_test_tier();
        let ttl = Duration::from_secs(60);
        tier.set("dns:records:a.com", b"1".to_vec(), ttl).await.expect("set");
        tier.set("dns:records:b.com", b"2".to_vec(), ttl).await.expect("set");
        tier.set("dns:records:c.com", b"3".to_vec(), Duration::ZERO).await.expect("set");
        tier.set("http:headers:a.com", b"4".to_vec(), ttl).await.expect("set");

        let keys = tier.scan("dns:records:*").await.expect("scan");
        assert_eq!(keys, vec!["dns:records:a.com", "dns:records:b.com"]);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (tier, _dir) = create_test_tier();
        tier.set("a", b"1".to_vec(), Duration::ZERO).await.expect("set");
        tier.set("b", b"2".to_vec(), Duration::from_secs(60)).await.expect("set");
        assert_eq!(tier.purge_expired().expect("purge"), 1);
        assert_eq!(tier.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let tier = LmdbFastTier::new(temp_dir.path(), 10).expect("open");
            tier.set("k", b"persisted".to_vec(), Duration::from_secs(60))
                .await
                .expect("set");
        }
        let tier = LmdbFastTier::new(temp_dir.path(), 10).expect("reopen");
        assert_eq!(
            tier.get("k").await.expect("get"),
            Some(b"persisted".to_vec())
        );
    }

    #[test]
    fn test_short_value_counts_as_expired() {
        assert!(is_expired(&[1, 2, 3], 0));
    }
}
