//! Constants for freshet
//!
//! Default values used by the configuration types. Centralizing them keeps
//! the `from_env` fallbacks and the tests in agreement.

// ============================================================================
// CACHE KEYS
// ============================================================================

/// Separator between cache key segments. Never allowed inside a segment.
pub const KEY_SEPARATOR: char = ':';

/// Wildcard used as the final segment of a batch-scan pattern.
pub const KEY_WILDCARD: &str = "*";

// ============================================================================
// TTLS
// ============================================================================

/// Default DNS TTL when the provider does not supply one (1 hour)
pub const DEFAULT_DNS_TTL_SECS: u64 = 3600;

/// Lower clamp for provider-supplied DNS TTLs (1 minute)
pub const DEFAULT_DNS_MIN_TTL_SECS: u64 = 60;

/// Upper clamp for provider-supplied DNS TTLs (24 hours)
pub const DEFAULT_DNS_MAX_TTL_SECS: u64 = 86400;

/// Certificate re-check window (24 hours)
pub const DEFAULT_CERT_RECHECK_SECS: u64 = 86400;

/// Minimum delay before a certificate re-check (1 hour)
pub const DEFAULT_CERT_RECHECK_FLOOR_SECS: u64 = 3600;

/// Re-check earlier when a certificate expires within this buffer (2 days)
pub const DEFAULT_CERT_EXPIRY_BUFFER_SECS: u64 = 172_800;

/// HTTP header snapshot TTL (12 hours)
pub const DEFAULT_HEADERS_TTL_SECS: u64 = 43200;

/// Hosting / SEO snapshot TTL (24 hours)
pub const DEFAULT_HOSTING_TTL_SECS: u64 = 86400;

/// CDN range list TTL (24 hours)
pub const DEFAULT_CDN_RANGES_TTL_SECS: u64 = 86400;

/// Subjects not accessed within this window are not refreshed (7 days)
pub const DEFAULT_REFRESH_RECENCY_WINDOW_SECS: u64 = 7 * 86400;

// ============================================================================
// CACHE
// ============================================================================

/// In-flight registry safety timeout
pub const DEFAULT_IN_FLIGHT_TIMEOUT_SECS: u64 = 30;

/// TTL for indefinite (null, not not-found) entries
pub const DEFAULT_INDEFINITE_TTL_SECS: u64 = 60;

/// Upper bound on how long a caller waits for a fast-tier write
pub const DEFAULT_FAST_WRITE_TIMEOUT_MS: u64 = 250;

// ============================================================================
// UPSTREAM PROVIDERS
// ============================================================================

/// Per-call upstream timeout
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 5000;

/// Maximum concurrent requests per upstream provider
pub const DEFAULT_UPSTREAM_CONCURRENCY: usize = 16;

/// Cloudflare DNS-over-HTTPS JSON endpoint
pub const CLOUDFLARE_DOH_URL: &str = "https://cloudflare-dns.com/dns-query";

/// Google DNS-over-HTTPS JSON endpoint
pub const GOOGLE_DOH_URL: &str = "https://dns.google/resolve";

/// Quad9 DNS-over-HTTPS JSON endpoint
pub const QUAD9_DOH_URL: &str = "https://dns.quad9.net:5053/dns-query";

/// Cloudflare published IPv4 ranges
pub const CLOUDFLARE_IPV4_RANGES_URL: &str = "https://www.cloudflare.com/ips-v4";

/// Cloudflare published IPv6 ranges
pub const CLOUDFLARE_IPV6_RANGES_URL: &str = "https://www.cloudflare.com/ips-v6";

// ============================================================================
// VERIFICATION
// ============================================================================

/// Prefix of the TXT record value and file body that proves ownership
pub const VERIFICATION_PREFIX: &str = "freshet-verification=";

/// Legacy subdomain label that may carry the TXT record
pub const VERIFICATION_TXT_LABEL: &str = "_freshet-verification";

/// Legacy fixed file path
pub const VERIFICATION_LEGACY_FILE_PATH: &str = "/.well-known/freshet-verification.txt";

/// `name` attribute of the ownership meta tag
pub const VERIFICATION_META_NAME: &str = "freshet-site-verify";

/// How often the resume job scans for pending subjects
pub const DEFAULT_VERIFY_SCAN_INTERVAL_SECS: u64 = 300;

/// Maximum pending subjects picked up per scan
pub const DEFAULT_VERIFY_BATCH_SIZE: usize = 100;

/// Step retries before a retryable step error is surfaced
pub const DEFAULT_STEP_MAX_RETRIES: u32 = 3;

/// Initial step retry backoff
pub const DEFAULT_STEP_INITIAL_BACKOFF_MS: u64 = 500;

/// Maximum step retry backoff
pub const DEFAULT_STEP_MAX_BACKOFF_MS: u64 = 30_000;
