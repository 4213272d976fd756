//! Freshet Resolve - Multi-Provider DNS Resolution
//!
//! Deterministic provider ordering, DNS-over-HTTPS providers, fall-through
//! resolution across providers, CDN range annotation, and the cached
//! lookup path that ties them to the tiered cache.

pub mod cached;
pub mod doh;
pub mod provider;
pub mod ranges;
pub mod resolver;
pub mod selector;

pub use cached::{snapshot_expiry, DnsCache, DnsSnapshot, DEFAULT_RECORD_TYPES};
pub use doh::{parse_envelope, DohClient, DohProvider};
pub use provider::{DnsProvider, QueryAnswer};
pub use ranges::{annotate, CdnRanges, CloudflareRangeSource, RangeCache, RangeSource};
pub use resolver::{normalize_subject, Resolution, Resolver};
pub use selector::{order, subject_hash};
