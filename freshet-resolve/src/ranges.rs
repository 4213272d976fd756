//! CDN address-range detection
//!
//! Published CIDR lists are fetched through the tiered cache and held by a
//! [`RangeCache`] owned by whoever builds the resolver. A/AAAA answers that
//! fall inside a range get their `cdn` field set.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use freshet_core::constants::{CLOUDFLARE_IPV4_RANGES_URL, CLOUDFLARE_IPV6_RANGES_URL};
use freshet_core::{CacheCategory, CacheKey, FreshetError, FreshetResult, RecordType, UpstreamRecord};
use freshet_storage::{CacheLookup, CacheRequest, Produced, TieredCache};
use ipnet::IpNet;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The networks announced by one CDN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnRanges {
    pub provider: String,
    pub networks: Vec<IpNet>,
}

impl CdnRanges {
    pub fn new(provider: impl Into<String>, networks: Vec<IpNet>) -> Self {
        Self {
            provider: provider.into(),
            networks,
        }
    }

    /// Parse one CIDR per line. Blank lines, `#` comments and unparsable
    /// lines are skipped.
    pub fn parse(provider: impl Into<String>, text: &str) -> Self {
        let provider = provider.into();
        let networks = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| match line.parse::<IpNet>() {
                Ok(net) => Some(net),
                Err(e) => {
                    debug!(provider = %provider, line = %line, error = %e, "Skipping unparsable range");
                    None
                }
            })
            .collect();
        Self { provider, networks }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.networks.iter().any(|net| net.contains(&addr))
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

/// Set `cdn` on every A/AAAA record whose address is inside `ranges`.
pub fn annotate(records: &mut [UpstreamRecord], ranges: &CdnRanges) {
    for record in records
        .iter_mut()
        .filter(|r| matches!(r.record_type, RecordType::A | RecordType::AAAA))
    {
        if let Ok(addr) = record.value.trim().parse::<IpAddr>() {
            if ranges.contains(addr) {
                record.cdn = Some(ranges.provider.clone());
            }
        }
    }
}

/// Where a CDN publishes its ranges.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Cache subject and CDN label, e.g. `cloudflare`.
    fn name(&self) -> &str;

    async fn fetch(&self) -> FreshetResult<CdnRanges>;
}

/// Cloudflare's `ips-v4` and `ips-v6` text lists.
#[derive(Debug, Clone)]
pub struct CloudflareRangeSource {
    client: Client,
    urls: Vec<String>,
}

impl CloudflareRangeSource {
    pub fn new(timeout: Duration) -> FreshetResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FreshetError::producer)?;
        Ok(Self {
            client,
            urls: vec![
                CLOUDFLARE_IPV4_RANGES_URL.to_string(),
                CLOUDFLARE_IPV6_RANGES_URL.to_string(),
            ],
        })
    }
}

#[async_trait]
impl RangeSource for CloudflareRangeSource {
    fn name(&self) -> &str {
        "cloudflare"
    }

    async fn fetch(&self) -> FreshetResult<CdnRanges> {
        let mut text = String::new();
        for url in &self.urls {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(FreshetError::producer)?;
            text.push_str(&response.text().await.map_err(FreshetError::producer)?);
            text.push('\n');
        }
        Ok(CdnRanges::parse(self.name(), &text))
    }
}

/// Process-local holder of one CDN's ranges.
pub struct RangeCache {
    cache: TieredCache,
    source: Arc<dyn RangeSource>,
    ttl: Duration,
    last_known: RwLock<Option<Arc<CdnRanges>>>,
}

impl RangeCache {
    pub fn new(cache: TieredCache, source: Arc<dyn RangeSource>, ttl: Duration) -> Self {
        Self {
            cache,
            source,
            ttl,
            last_known: RwLock::new(None),
        }
    }

    /// Current ranges, fetching them if the cached copy has expired.
    ///
    /// Falls back to the last successfully loaded list when the source is
    /// unreachable. `None` only if nothing has ever loaded.
    pub async fn ranges(&self) -> Option<Arc<CdnRanges>> {
        match self.load().await {
            Ok(CacheLookup::Value(ranges)) => {
                let ranges = Arc::new(ranges);
                if let Ok(mut last) = self.last_known.write() {
                    *last = Some(Arc::clone(&ranges));
                }
                Some(ranges)
            }
            Ok(_) => self.last_known(),
            Err(e) => {
                warn!(source = %self.source.name(), error = %e, "CDN range refresh failed, using last known list");
                self.last_known()
            }
        }
    }

    fn last_known(&self) -> Option<Arc<CdnRanges>> {
        self.last_known.read().ok().and_then(|last| last.clone())
    }

    async fn load(&self) -> FreshetResult<CacheLookup<CdnRanges>> {
        let key = CacheKey::for_category(CacheCategory::CdnRanges, self.source.name())?;
        let source = Arc::clone(&self.source);
        self.cache
            .get_or_create(CacheRequest::new(key, self.ttl), move || async move {
                let ranges = source.fetch().await?;
                if ranges.is_empty() {
                    return Ok(Produced::indefinite());
                }
                Ok(Produced::found(ranges))
            })
            .await
    }
}

impl std::fmt::Debug for RangeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeCache")
            .field("source", &self.source.name())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshet_core::CacheConfig;
    use freshet_storage::InMemoryFastTier;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const SAMPLE: &str = "173.245.48.0/20\n# comment\n\nnot-a-cidr\n2400:cb00::/32\n";

    struct Toggle {
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RangeSource for Toggle {
        fn name(&self) -> &str {
            "cloudflare"
        }

        async fn fetch(&self) -> FreshetResult<CdnRanges> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(FreshetError::producer("unreachable"));
            }
            Ok(CdnRanges::parse("cloudflare", SAMPLE))
        }
    }

    fn cache() -> TieredCache {
        TieredCache::new(Arc::new(InMemoryFastTier::new()), CacheConfig::default())
    }

    #[test]
    fn test_parse_skips_noise() {
        let ranges = CdnRanges::parse("cloudflare", SAMPLE);
        assert_eq!(ranges.len(), 2);
        assert!(ranges.contains("173.245.50.1".parse().expect("ip")));
        assert!(ranges.contains("2400:cb00::1".parse().expect("ip")));
        assert!(!ranges.contains("8.8.8.8".parse().expect("ip")));
    }

    #[test]
    fn test_annotate_only_addresses() {
        let ranges = CdnRanges::parse("cloudflare", SAMPLE);
        let mut records = vec![
            UpstreamRecord::new(RecordType::A, "example.com", "173.245.48.10"),
            UpstreamRecord::new(RecordType::A, "example.com", "93.184.216.34"),
            UpstreamRecord::new(RecordType::TXT, "example.com", "173.245.48.10"),
        ];
        annotate(&mut records, &ranges);
        assert_eq!(records[0].cdn.as_deref(), Some("cloudflare"));
        assert_eq!(records[1].cdn, None);
        assert_eq!(records[2].cdn, None);
    }

    #[tokio::test]
    async fn test_range_cache_fetches_once() {
        let source = Arc::new(Toggle {
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let ranges = RangeCache::new(cache(), source.clone(), Duration::from_secs(86400));

        assert_eq!(ranges.ranges().await.map(|r| r.len()), Some(2));
        assert_eq!(ranges.ranges().await.map(|r| r.len()), Some(2));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_range_cache_falls_back_to_last_known() {
        let source = Arc::new(Toggle {
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let shared = cache();
        let ranges = RangeCache::new(shared.clone(), source.clone(), Duration::from_secs(86400));
        assert!(ranges.ranges().await.is_some());

        let key = CacheKey::for_category(CacheCategory::CdnRanges, "cloudflare").expect("key");
        shared.invalidate(&key).await.expect("invalidate");
        source.fail.store(true, Ordering::SeqCst);

        assert_eq!(ranges.ranges().await.map(|r| r.len()), Some(2));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_range_cache_nothing_loaded() {
        let source = Arc::new(Toggle {
            fail: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let ranges = RangeCache::new(cache(), source, Duration::from_secs(86400));
        assert!(ranges.ranges().await.is_none());
    }
}
