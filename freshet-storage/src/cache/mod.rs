//! Two-tier cache with request coalescing and negative caching.
//!
//! A [`TieredCache`] checks a [`FastTier`], falls back to an optional
//! [`DurableTier`], and finally runs a producer. Producers report
//! "does not exist" explicitly through [`Produced::not_found`]; that answer
//! is cached and honored until it expires. A producer that has no answer at
//! all returns [`Produced::indefinite`] and the next read tries again.
//!
//! # Example
//!
//! ```ignore
//! let cache = TieredCache::new(Arc::new(InMemoryFastTier::new()), CacheConfig::default());
//! let key = CacheKey::for_category(CacheCategory::Hosting, "example.com")?;
//!
//! let lookup = cache
//!     .get_or_create(CacheRequest::new(key, Duration::from_secs(86400)), || async {
//!         Ok(Produced::found(fetch_hosting().await?))
//!     })
//!     .await?;
//! ```

pub mod entry;
pub mod inflight;
pub mod lmdb_backend;
pub mod memory;
pub mod tiered;
pub mod traits;

pub use entry::{CacheEntry, CacheLookup, Produced};
pub use inflight::InFlightRegistry;
pub use lmdb_backend::{LmdbFastTier, LmdbTierError};
pub use memory::{InMemoryFastTier, TierStats};
pub use tiered::{CacheRequest, TieredCache};
pub use traits::{pattern_matches, CacheStats, CacheValue, DurableTier, FastTier};
