//! Cache entries and producer results.
//!
//! An entry is *definitive* when it carries a value or an explicit
//! `not_found`; otherwise it is *indefinite* and readers treat it as a miss.

use std::time::Duration;

use chrono::Utc;
use freshet_core::{chrono_duration, FreshetResult, StorageError, Timestamp};
use serde::{Deserialize, Serialize};

use super::traits::CacheValue;

/// A value as stored in the fast tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: Option<T>,
    /// Always written; entries written without it read back as indefinite.
    #[serde(default)]
    pub not_found: bool,
    pub produced_at: Timestamp,
    pub expires_at: Timestamp,
}

impl<T: CacheValue> CacheEntry<T> {
    fn build(
        key: impl Into<String>,
        value: Option<T>,
        not_found: bool,
        now: Timestamp,
        ttl: Duration,
    ) -> Self {
        let expires_at = now
            .checked_add_signed(chrono_duration(ttl))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
        Self {
            key: key.into(),
            value,
            not_found,
            produced_at: now,
            expires_at,
        }
    }

    pub fn positive(key: impl Into<String>, value: T, now: Timestamp, ttl: Duration) -> Self {
        Self::build(key, Some(value), false, now, ttl)
    }

    /// Permanent negative result. Honored until it expires.
    pub fn negative(key: impl Into<String>, now: Timestamp, ttl: Duration) -> Self {
        Self::build(key, None, true, now, ttl)
    }

    /// Transient miss. Written so the slot is visible, never served.
    pub fn indefinite(key: impl Into<String>, now: Timestamp, ttl: Duration) -> Self {
        Self::build(key, None, false, now, ttl)
    }

    pub fn is_definitive(&self) -> bool {
        self.value.is_some() || self.not_found
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// What a reader should see, or `None` if the entry must be re-produced.
    pub fn into_lookup(self) -> Option<CacheLookup<T>> {
        match (self.value, self.not_found) {
            (Some(value), _) => Some(CacheLookup::Value(value)),
            (None, true) => Some(CacheLookup::NotFound),
            (None, false) => None,
        }
    }

    pub fn to_bytes(&self) -> FreshetResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            StorageError::Serialization {
                key: self.key.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn from_bytes(key: &str, bytes: &[u8]) -> FreshetResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            StorageError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Outcome of a tiered-cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Value(T),
    /// Definitive "does not exist".
    NotFound,
    /// The producer had no answer this time; the next read re-produces.
    Unavailable,
}

impl<T> CacheLookup<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            CacheLookup::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            CacheLookup::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheLookup::NotFound)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheLookup<U> {
        match self {
            CacheLookup::Value(value) => CacheLookup::Value(f(value)),
            CacheLookup::NotFound => CacheLookup::NotFound,
            CacheLookup::Unavailable => CacheLookup::Unavailable,
        }
    }
}

/// What a producer hands back to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Produced<T> {
    value: Option<T>,
    not_found: bool,
    ttl: Option<Duration>,
}

impl<T> Produced<T> {
    pub fn found(value: T) -> Self {
        Self {
            value: Some(value),
            not_found: false,
            ttl: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            value: None,
            not_found: true,
            ttl: None,
        }
    }

    pub fn indefinite() -> Self {
        Self {
            value: None,
            not_found: false,
            ttl: None,
        }
    }

    /// Override the request TTL for this result only.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_not_found(&self) -> bool {
        self.not_found
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub(crate) fn into_parts(self) -> (Option<T>, bool, Option<Duration>) {
        (self.value, self.not_found, self.ttl)
    }
}
