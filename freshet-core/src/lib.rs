//! Freshet Core - Shared Types
//!
//! Error taxonomy, configuration, cache keys and the upstream record model.
//! Every other freshet crate depends on this one. Nothing here performs I/O.

use chrono::{DateTime, Utc};

pub mod config;
pub mod constants;
pub mod error;
pub mod key;
pub mod record;

pub use config::{
    CacheConfig, FreshetConfig, ProviderKind, ResolverConfig, RetryConfig, TtlConfig,
    VerificationConfig,
};
pub use error::{
    ConfigError, FailureClass, FreshetError, FreshetResult, KeyError, ResolveError, StorageError,
    Tier, VerificationError,
};
pub use key::{encode_segments, CacheCategory, CacheKey};
pub use record::{deduplicate, normalize, sort_by_type, RecordKey, RecordType, UpstreamRecord};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Convert a std duration to a chrono duration, saturating on overflow.
pub fn chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
