//! Multi-provider resolution
//!
//! Providers are tried in the subject's selector order. Each provider gets
//! every requested record type at once; any failure, timeout or malformed
//! envelope moves on to the next provider. Only when all of them fail does
//! the caller see an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use freshet_core::{normalize, ResolveError, RecordType, ResolverConfig, Timestamp, UpstreamRecord};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::doh::{DohClient, DohProvider};
use crate::provider::{DnsProvider, QueryAnswer};
use crate::ranges::{annotate, RangeCache};
use crate::selector;

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub subject: String,
    /// Deduplicated and ordered by the requested type order.
    pub records: Vec<UpstreamRecord>,
    pub resolver_used: String,
    /// At least one type was answered with "no such name".
    #[serde(default)]
    pub nxdomain: bool,
    pub resolved_at: Timestamp,
}

/// Resolves subjects against an ordered set of providers.
pub struct Resolver {
    providers: Vec<Arc<dyn DnsProvider>>,
    timeout: Duration,
    ranges: Option<Arc<RangeCache>>,
}

impl Resolver {
    pub fn new(providers: Vec<Arc<dyn DnsProvider>>, timeout: Duration) -> Self {
        Self {
            providers,
            timeout,
            ranges: None,
        }
    }

    /// Build DoH providers for every configured provider kind.
    pub fn from_config(config: &ResolverConfig) -> Result<Self, ResolveError> {
        Ok(Self::new(shared(doh_providers(config, false)?), config.timeout))
    }

    /// Like [`Resolver::from_config`], but every request carries a
    /// throwaway parameter so no intermediary answers from its cache.
    pub fn uncached(config: &ResolverConfig) -> Result<Self, ResolveError> {
        Ok(Self::new(shared(doh_providers(config, true)?), config.timeout))
    }

    /// Annotate A/AAAA answers with the CDN that announces them.
    pub fn with_ranges(mut self, ranges: Arc<RangeCache>) -> Self {
        self.ranges = Some(ranges);
        self
    }

    pub fn providers(&self) -> &[Arc<dyn DnsProvider>] {
        &self.providers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve `subject` for each of `record_types`.
    pub async fn resolve(&self, subject: &str, record_types: &[RecordType]) -> Result<Resolution, ResolveError> {
        let subject = normalize_subject(subject);
        let mut types: Vec<RecordType> = Vec::with_capacity(record_types.len());
        for record_type in record_types {
            if !types.contains(record_type) {
                types.push(*record_type);
            }
        }

        let ordered = selector::order(&subject, &self.providers);
        if ordered.is_empty() {
            return Err(ResolveError::NoProviders { subject });
        }

        let attempted = ordered.len();
        let mut last_error = None;
        for provider in ordered {
            match self.query_all(provider.as_ref(), &subject, &types).await {
                Ok(answers) => {
                    let nxdomain = answers.iter().any(|a| a.nxdomain);
                    let combined = answers.into_iter().flat_map(|a| a.records).collect();
                    let mut records = normalize(combined, &types);
                    if let Some(ranges) = &self.ranges {
                        if let Some(known) = ranges.ranges().await {
                            annotate(&mut records, &known);
                        }
                    }
                    debug!(
                        subject = %subject,
                        provider = %provider.id(),
                        records = records.len(),
                        nxdomain,
                        "Resolved"
                    );
                    return Ok(Resolution {
                        subject,
                        records,
                        resolver_used: provider.id().to_string(),
                        nxdomain,
                        resolved_at: Utc::now(),
                    });
                }
                Err(e) => {
                    warn!(subject = %subject, provider = %provider.id(), error = %e, "Provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(ResolveError::AllProvidersFailed {
            subject,
            attempted,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn query_all(
        &self,
        provider: &dyn DnsProvider,
        subject: &str,
        types: &[RecordType],
    ) -> Result<Vec<QueryAnswer>, ResolveError> {
        let queries = types.iter().map(|record_type| async move {
            match tokio::time::timeout(self.timeout, provider.query(subject, *record_type)).await {
                Ok(answer) => answer,
                Err(_) => Err(ResolveError::Timeout {
                    provider: provider.id().to_string(),
                    after: self.timeout,
                }),
            }
        });
        try_join_all(queries).await
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.providers.iter().map(|p| p.id()).collect();
        f.debug_struct("Resolver")
            .field("providers", &ids)
            .field("timeout", &self.timeout)
            .field("ranges", &self.ranges.is_some())
            .finish()
    }
}

/// Lower-cased, trimmed, without the root dot.
pub fn normalize_subject(subject: &str) -> String {
    subject.trim().trim_end_matches('.').to_lowercase()
}

fn doh_providers(config: &ResolverConfig, cache_bust: bool) -> Result<Vec<DohProvider>, ResolveError> {
    config
        .providers
        .iter()
        .map(|kind| {
            DohClient::for_kind(*kind, config.timeout, config.max_concurrency)
                .map(|client| DohProvider::new(client.with_cache_bust(cache_bust)))
        })
        .collect()
}

fn shared(providers: Vec<DohProvider>) -> Vec<Arc<dyn DnsProvider>> {
    providers
        .into_iter()
        .map(|p| Arc::new(p) as Arc<dyn DnsProvider>)
        .collect()
}
