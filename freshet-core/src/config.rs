//! Configuration types
//!
//! Every component config has sane defaults from [`crate::constants`], can be
//! overridden from `FRESHET_*` environment variables, and is checked by
//! `validate()` before use. [`FreshetConfig`] aggregates them and can also be
//! read from a TOML document.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::error::{ConfigError, FreshetError, FreshetResult};
use crate::key::CacheCategory;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: impl std::fmt::Debug, reason: &str) -> FreshetError {
    FreshetError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: format!("{:?}", value),
        reason: reason.to_string(),
    })
}

// ============================================================================
// TTL POLICY
// ============================================================================

/// TTL defaults and clamps, per result category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    /// Used when a provider does not supply a TTL
    pub dns_default: Duration,
    /// Provider TTLs below this are raised to it
    pub dns_min: Duration,
    /// Provider TTLs above this are lowered to it
    pub dns_max: Duration,
    pub cert_recheck: Duration,
    pub cert_recheck_floor: Duration,
    pub cert_expiry_buffer: Duration,
    pub headers: Duration,
    pub hosting: Duration,
    pub seo: Duration,
    pub cdn_ranges: Duration,
    /// Subjects not accessed within this window are not refreshed
    pub refresh_recency_window: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            dns_default: Duration::from_secs(DEFAULT_DNS_TTL_SECS),
            dns_min: Duration::from_secs(DEFAULT_DNS_MIN_TTL_SECS),
            dns_max: Duration::from_secs(DEFAULT_DNS_MAX_TTL_SECS),
            cert_recheck: Duration::from_secs(DEFAULT_CERT_RECHECK_SECS),
            cert_recheck_floor: Duration::from_secs(DEFAULT_CERT_RECHECK_FLOOR_SECS),
            cert_expiry_buffer: Duration::from_secs(DEFAULT_CERT_EXPIRY_BUFFER_SECS),
            headers: Duration::from_secs(DEFAULT_HEADERS_TTL_SECS),
            hosting: Duration::from_secs(DEFAULT_HOSTING_TTL_SECS),
            seo: Duration::from_secs(DEFAULT_HOSTING_TTL_SECS),
            cdn_ranges: Duration::from_secs(DEFAULT_CDN_RANGES_TTL_SECS),
            refresh_recency_window: Duration::from_secs(DEFAULT_REFRESH_RECENCY_WINDOW_SECS),
        }
    }
}

impl TtlConfig {
    /// Create TtlConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FRESHET_DNS_TTL_SECS` (default: 3600)
    /// - `FRESHET_DNS_MIN_TTL_SECS` (default: 60)
    /// - `FRESHET_DNS_MAX_TTL_SECS` (default: 86400)
    /// - `FRESHET_CERT_RECHECK_SECS` (default: 86400)
    /// - `FRESHET_HEADERS_TTL_SECS` (default: 43200)
    /// - `FRESHET_HOSTING_TTL_SECS` (default: 86400)
    /// - `FRESHET_REFRESH_RECENCY_SECS` (default: 604800)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, fallback: Duration| {
            Duration::from_secs(env_or(name, fallback.as_secs()))
        };

        Self {
            dns_default: secs("FRESHET_DNS_TTL_SECS", defaults.dns_default),
            dns_min: secs("FRESHET_DNS_MIN_TTL_SECS", defaults.dns_min),
            dns_max: secs("FRESHET_DNS_MAX_TTL_SECS", defaults.dns_max),
            cert_recheck: secs("FRESHET_CERT_RECHECK_SECS", defaults.cert_recheck),
            headers: secs("FRESHET_HEADERS_TTL_SECS", defaults.headers),
            hosting: secs("FRESHET_HOSTING_TTL_SECS", defaults.hosting),
            seo: secs("FRESHET_HOSTING_TTL_SECS", defaults.seo),
            refresh_recency_window: secs(
                "FRESHET_REFRESH_RECENCY_SECS",
                defaults.refresh_recency_window,
            ),
            ..defaults
        }
    }

    /// Default TTL for a category when the upstream gives no hint.
    pub fn default_for(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::DnsRecords => self.dns_default,
            CacheCategory::Certificate => self.cert_recheck,
            CacheCategory::Headers => self.headers,
            CacheCategory::Hosting => self.hosting,
            CacheCategory::Seo => self.seo,
            CacheCategory::CdnRanges => self.cdn_ranges,
        }
    }

    pub fn validate(&self) -> FreshetResult<()> {
        if self.dns_min.is_zero() {
            return Err(invalid("ttl.dns_min", self.dns_min, "must be positive"));
        }
        if self.dns_min > self.dns_max {
            return Err(invalid(
                "ttl.dns_min",
                self.dns_min,
                "must not exceed ttl.dns_max",
            ));
        }
        if self.dns_default < self.dns_min || self.dns_default > self.dns_max {
            return Err(invalid(
                "ttl.dns_default",
                self.dns_default,
                "must lie within [dns_min, dns_max]",
            ));
        }
        if self.cert_recheck_floor > self.cert_recheck {
            return Err(invalid(
                "ttl.cert_recheck_floor",
                self.cert_recheck_floor,
                "must not exceed ttl.cert_recheck",
            ));
        }
        if self.refresh_recency_window.is_zero() {
            return Err(invalid(
                "ttl.refresh_recency_window",
                self.refresh_recency_window,
                "must be positive",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TIERED CACHE
// ============================================================================

/// Configuration for the tiered cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// In-flight handles are dropped after this even if never settled
    pub in_flight_timeout: Duration,
    /// Fast-tier lifetime of indefinite (retry-next-time) entries
    pub indefinite_ttl: Duration,
    /// Callers never wait longer than this on a fast-tier write
    pub fast_write_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            in_flight_timeout: Duration::from_secs(DEFAULT_IN_FLIGHT_TIMEOUT_SECS),
            indefinite_ttl: Duration::from_secs(DEFAULT_INDEFINITE_TTL_SECS),
            fast_write_timeout: Duration::from_millis(DEFAULT_FAST_WRITE_TIMEOUT_MS),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Environment Variables
    /// - `FRESHET_IN_FLIGHT_TIMEOUT_SECS` (default: 30)
    /// - `FRESHET_INDEFINITE_TTL_SECS` (default: 60)
    /// - `FRESHET_FAST_WRITE_TIMEOUT_MS` (default: 250)
    pub fn from_env() -> Self {
        Self {
            in_flight_timeout: Duration::from_secs(env_or(
                "FRESHET_IN_FLIGHT_TIMEOUT_SECS",
                DEFAULT_IN_FLIGHT_TIMEOUT_SECS,
            )),
            indefinite_ttl: Duration::from_secs(env_or(
                "FRESHET_INDEFINITE_TTL_SECS",
                DEFAULT_INDEFINITE_TTL_SECS,
            )),
            fast_write_timeout: Duration::from_millis(env_or(
                "FRESHET_FAST_WRITE_TIMEOUT_MS",
                DEFAULT_FAST_WRITE_TIMEOUT_MS,
            )),
        }
    }

    pub fn with_in_flight_timeout(mut self, timeout: Duration) -> Self {
        self.in_flight_timeout = timeout;
        self
    }

    pub fn with_indefinite_ttl(mut self, ttl: Duration) -> Self {
        self.indefinite_ttl = ttl;
        self
    }

    pub fn with_fast_write_timeout(mut self, timeout: Duration) -> Self {
        self.fast_write_timeout = timeout;
        self
    }

    pub fn validate(&self) -> FreshetResult<()> {
        if self.in_flight_timeout.is_zero() {
            return Err(invalid(
                "cache.in_flight_timeout",
                self.in_flight_timeout,
                "must be positive",
            ));
        }
        if self.indefinite_ttl.is_zero() {
            return Err(invalid(
                "cache.indefinite_ttl",
                self.indefinite_ttl,
                "must be positive",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// UPSTREAM RESOLUTION
// ============================================================================

/// Known DNS-over-HTTPS providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Cloudflare,
    Google,
    Quad9,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Cloudflare => "cloudflare",
            ProviderKind::Google => "google",
            ProviderKind::Quad9 => "quad9",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            ProviderKind::Cloudflare => CLOUDFLARE_DOH_URL,
            ProviderKind::Google => GOOGLE_DOH_URL,
            ProviderKind::Quad9 => QUAD9_DOH_URL,
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cloudflare" => Ok(ProviderKind::Cloudflare),
            "google" => Ok(ProviderKind::Google),
            "quad9" => Ok(ProviderKind::Quad9),
            other => Err(ConfigError::InvalidValue {
                field: "resolver.providers".to_string(),
                value: other.to_string(),
                reason: "unknown DoH provider".to_string(),
            }),
        }
    }
}

/// Configuration for upstream DNS resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub providers: Vec<ProviderKind>,
    /// Bound on a single upstream call
    pub timeout: Duration,
    /// Concurrent requests allowed per provider
    pub max_concurrency: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            providers: vec![ProviderKind::Cloudflare, ProviderKind::Google],
            timeout: Duration::from_millis(DEFAULT_UPSTREAM_TIMEOUT_MS),
            max_concurrency: DEFAULT_UPSTREAM_CONCURRENCY,
        }
    }
}

impl ResolverConfig {
    /// # Environment Variables
    /// - `FRESHET_DOH_PROVIDERS`: comma separated list (default: cloudflare,google)
    /// - `FRESHET_UPSTREAM_TIMEOUT_MS` (default: 5000)
    /// - `FRESHET_UPSTREAM_CONCURRENCY` (default: 16)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let providers = std::env::var("FRESHET_DOH_PROVIDERS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .filter_map(|s| s.parse().ok())
                    .collect::<Vec<ProviderKind>>()
            })
            .filter(|providers| !providers.is_empty())
            .unwrap_or(defaults.providers);

        Self {
            providers,
            timeout: Duration::from_millis(env_or(
                "FRESHET_UPSTREAM_TIMEOUT_MS",
                DEFAULT_UPSTREAM_TIMEOUT_MS,
            )),
            max_concurrency: env_or("FRESHET_UPSTREAM_CONCURRENCY", DEFAULT_UPSTREAM_CONCURRENCY),
        }
    }

    pub fn validate(&self) -> FreshetResult<()> {
        if self.providers.is_empty() {
            return Err(FreshetError::Config(ConfigError::MissingRequired {
                field: "resolver.providers".to_string(),
            }));
        }
        if self.timeout.is_zero() {
            return Err(invalid("resolver.timeout", self.timeout, "must be positive"));
        }
        if self.max_concurrency == 0 {
            return Err(invalid(
                "resolver.max_concurrency",
                self.max_concurrency,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// VERIFICATION
// ============================================================================

/// Retry policy for a single durable step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_STEP_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_STEP_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_STEP_MAX_BACKOFF_MS),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(32) as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * factor as f64)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Configuration for ownership verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// How often the resume job scans for pending subjects
    pub scan_interval: Duration,
    /// Maximum pending subjects picked up per scan
    pub batch_size: usize,
    /// Timeout for HTTP probes
    pub probe_timeout: Duration,
    pub step_retry: RetryConfig,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(DEFAULT_VERIFY_SCAN_INTERVAL_SECS),
            batch_size: DEFAULT_VERIFY_BATCH_SIZE,
            probe_timeout: Duration::from_millis(DEFAULT_UPSTREAM_TIMEOUT_MS),
            step_retry: RetryConfig::default(),
        }
    }
}

impl VerificationConfig {
    /// # Environment Variables
    /// - `FRESHET_VERIFY_SCAN_INTERVAL_SECS` (default: 300)
    /// - `FRESHET_VERIFY_BATCH_SIZE` (default: 100)
    /// - `FRESHET_VERIFY_PROBE_TIMEOUT_MS` (default: 5000)
    /// - `FRESHET_STEP_MAX_RETRIES` (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scan_interval: Duration::from_secs(env_or(
                "FRESHET_VERIFY_SCAN_INTERVAL_SECS",
                DEFAULT_VERIFY_SCAN_INTERVAL_SECS,
            )),
            batch_size: env_or("FRESHET_VERIFY_BATCH_SIZE", DEFAULT_VERIFY_BATCH_SIZE),
            probe_timeout: Duration::from_millis(env_or(
                "FRESHET_VERIFY_PROBE_TIMEOUT_MS",
                DEFAULT_UPSTREAM_TIMEOUT_MS,
            )),
            step_retry: RetryConfig {
                max_retries: env_or("FRESHET_STEP_MAX_RETRIES", DEFAULT_STEP_MAX_RETRIES),
                ..defaults.step_retry
            },
        }
    }

    /// Shorter intervals for development and tests.
    pub fn development() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            batch_size: 10,
            probe_timeout: Duration::from_secs(2),
            step_retry: RetryConfig {
                max_retries: 1,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(100),
                backoff_multiplier: 2.0,
            },
        }
    }

    pub fn validate(&self) -> FreshetResult<()> {
        if self.scan_interval.is_zero() {
            return Err(invalid(
                "verification.scan_interval",
                self.scan_interval,
                "must be positive",
            ));
        }
        if self.batch_size == 0 {
            return Err(invalid(
                "verification.batch_size",
                self.batch_size,
                "must be at least 1",
            ));
        }
        if self.step_retry.backoff_multiplier <= 0.0 {
            return Err(invalid(
                "verification.step_retry.backoff_multiplier",
                self.step_retry.backoff_multiplier,
                "must be positive",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshetConfig {
    pub ttl: TtlConfig,
    pub cache: CacheConfig,
    pub resolver: ResolverConfig,
    pub verification: VerificationConfig,
}

impl FreshetConfig {
    pub fn from_env() -> Self {
        Self {
            ttl: TtlConfig::from_env(),
            cache: CacheConfig::from_env(),
            resolver: ResolverConfig::from_env(),
            verification: VerificationConfig::from_env(),
        }
    }

    /// Parse a TOML document. Missing sections and fields take defaults.
    pub fn from_toml_str(raw: &str) -> FreshetResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| {
            FreshetError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> FreshetResult<()> {
        self.ttl.validate()?;
        self.cache.validate()?;
        self.resolver.validate()?;
        self.verification.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        FreshetConfig::default()
            .validate()
            .expect("defaults should be valid");
    }

    #[test]
    fn test_ttl_defaults_match_constants() {
        let ttl = TtlConfig::default();
        assert_eq!(ttl.dns_default, Duration::from_secs(3600));
        assert_eq!(ttl.dns_max, Duration::from_secs(86400));
        assert_eq!(ttl.headers, Duration::from_secs(43200));
        assert_eq!(ttl.default_for(CacheCategory::Hosting), Duration::from_secs(86400));
        assert_eq!(ttl.default_for(CacheCategory::Certificate), Duration::from_secs(86400));
    }

    #[test]
    fn test_ttl_validate_rejects_inverted_clamp() {
        let ttl = TtlConfig {
            dns_min: Duration::from_secs(100),
            dns_max: Duration::from_secs(10),
            ..TtlConfig::default()
        };
        assert!(ttl.validate().is_err());
    }

    #[test]
    fn test_resolver_validate_requires_providers() {
        let config = ResolverConfig {
            providers: vec![],
            ..ResolverConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            FreshetError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("Google".parse::<ProviderKind>(), Ok(ProviderKind::Google));
        assert!("opendns".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_in_flight_timeout(Duration::from_secs(5))
            .with_indefinite_ttl(Duration::from_secs(10))
            .with_fast_write_timeout(Duration::from_millis(50));
        assert_eq!(config.in_flight_timeout, Duration::from_secs(5));
        assert_eq!(config.indefinite_ttl, Duration::from_secs(10));
        assert_eq!(config.fast_write_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_retry_backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.backoff_for(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(350));
        assert_eq!(retry.backoff_for(10), Duration::from_millis(350));
    }

    #[test]
    fn test_from_toml_partial_document() {
        let raw = r#"
            [resolver]
            providers = ["quad9", "google"]
            max_concurrency = 4

            [resolver.timeout]
            secs = 2
            nanos = 0
        "#;
        let config = FreshetConfig::from_toml_str(raw).expect("valid toml");
        assert_eq!(
            config.resolver.providers,
            vec![ProviderKind::Quad9, ProviderKind::Google]
        );
        assert_eq!(config.resolver.max_concurrency, 4);
        assert_eq!(config.resolver.timeout, Duration::from_secs(2));
        assert_eq!(config.ttl, TtlConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        let raw = r#"
            [resolver]
            providers = []
        "#;
        assert!(FreshetConfig::from_toml_str(raw).is_err());
    }
}
