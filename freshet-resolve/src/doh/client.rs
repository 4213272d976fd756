//! DNS-over-HTTPS JSON client with a per-provider concurrency limit

use std::sync::Arc;
use std::time::Duration;

use freshet_core::{ProviderKind, RecordType, ResolveError};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::Semaphore;

/// Media type of the JSON DoH dialect.
pub const DNS_JSON: &str = "application/dns-json";

/// HTTP client for one DoH endpoint.
pub struct DohClient {
    client: Client,
    id: String,
    endpoint: String,
    rate_limiter: Arc<Semaphore>,
    cache_bust: bool,
}

impl DohClient {
    /// Create a client for `endpoint`.
    ///
    /// # Arguments
    /// * `id` - Provider name used in errors and as `resolver_used`
    /// * `timeout` - Bound on a whole request including the body
    /// * `max_concurrency` - Requests allowed in flight at once
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
        max_concurrency: usize,
    ) -> Result<Self, ResolveError> {
        let id = id.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::ProviderFailed {
                provider: id.clone(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            id,
            endpoint: endpoint.into(),
            rate_limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
            cache_bust: false,
        })
    }

    /// Client for one of the well-known providers.
    pub fn for_kind(kind: ProviderKind, timeout: Duration, max_concurrency: usize) -> Result<Self, ResolveError> {
        Self::new(kind.name(), kind.endpoint(), timeout, max_concurrency)
    }

    /// Add a throwaway query parameter so intermediaries cannot serve a
    /// cached answer. Used for ownership checks.
    pub fn with_cache_bust(mut self, cache_bust: bool) -> Self {
        self.cache_bust = cache_bust;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cache_bust(&self) -> bool {
        self.cache_bust
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the raw JSON envelope for `(name, record_type)`.
    pub async fn query(&self, name: &str, record_type: RecordType) -> Result<Value, ResolveError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| self.failed(format!("Rate limiter error: {}", e)))?;

        let mut params = vec![
            ("name", name.to_string()),
            ("type", record_type.code().to_string()),
        ];
        if self.cache_bust {
            let nonce = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
            params.push(("nocache", nonce.to_string()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", DNS_JSON)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    self.failed(format!("Request timed out: {}", e))
                } else {
                    self.failed(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| ResolveError::MalformedEnvelope {
                    provider: self.id.clone(),
                    reason: format!("Failed to parse response: {}", e),
                })
        } else {
            Err(match status {
                StatusCode::TOO_MANY_REQUESTS => ResolveError::RateLimited {
                    provider: self.id.clone(),
                    retry_after_ms,
                },
                _ => self.failed(format!("HTTP {}", status.as_u16())),
            })
        }
    }

    fn failed(&self, reason: String) -> ResolveError {
        ResolveError::ProviderFailed {
            provider: self.id.clone(),
            reason,
        }
    }
}

fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .map(|seconds| (seconds * 1000.0) as i64)
}

impl std::fmt::Debug for DohClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohClient")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("cache_bust", &self.cache_bust)
            .finish()
    }
}
