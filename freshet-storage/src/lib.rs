//! Freshet Storage - Tiered Cache and Freshness
//!
//! The coalescing cache-or-produce primitive, the fast-tier backends it runs
//! on, and the scheduler that decides when cached data needs refreshing.

pub mod cache;
pub mod freshness;
pub mod refresh;

pub use cache::{
    CacheEntry, CacheLookup, CacheRequest, CacheStats, CacheValue, DurableTier, FastTier,
    InFlightRegistry, InMemoryFastTier, LmdbFastTier, LmdbTierError, Produced, TierStats,
    TieredCache,
};
pub use freshness::FreshnessScheduler;
pub use refresh::{InMemoryRefreshQueue, RefreshQueue, RevalidationTask};
