//! Cached DNS lookups.
//!
//! Wires resolution through the tiered cache. The entry lives until the
//! earliest clamped record TTL, and a revalidation task for that moment is
//! handed to the refresh queue when the subject has been read recently.

use std::sync::Arc;

use chrono::Utc;
use freshet_core::{
    CacheCategory, CacheKey, FreshetError, FreshetResult, RecordType, Timestamp, UpstreamRecord,
};
use freshet_storage::{
    CacheLookup, CacheRequest, DurableTier, FreshnessScheduler, Produced, RefreshQueue,
    RevalidationTask, TieredCache,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::resolver::{normalize_subject, Resolver};

/// Record types fetched when the caller does not say otherwise.
pub const DEFAULT_RECORD_TYPES: [RecordType; 6] = [
    RecordType::A,
    RecordType::AAAA,
    RecordType::CNAME,
    RecordType::MX,
    RecordType::NS,
    RecordType::TXT,
];

/// What is cached for a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsSnapshot {
    pub subject: String,
    pub records: Vec<UpstreamRecord>,
    pub resolver_used: String,
    pub resolved_at: Timestamp,
    /// Earliest record expiry.
    pub expires_at: Timestamp,
}

/// Cache-or-resolve front end for DNS data.
#[derive(Clone)]
pub struct DnsCache {
    cache: TieredCache,
    resolver: Arc<Resolver>,
    scheduler: FreshnessScheduler,
    queue: Option<Arc<dyn RefreshQueue>>,
    durable: Option<Arc<dyn DurableTier<DnsSnapshot>>>,
    record_types: Vec<RecordType>,
}

impl DnsCache {
    pub fn new(cache: TieredCache, resolver: Arc<Resolver>, scheduler: FreshnessScheduler) -> Self {
        Self {
            cache,
            resolver,
            scheduler,
            queue: None,
            durable: None,
            record_types: DEFAULT_RECORD_TYPES.to_vec(),
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn RefreshQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_durable(mut self, durable: Arc<dyn DurableTier<DnsSnapshot>>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn with_record_types(mut self, record_types: Vec<RecordType>) -> Self {
        self.record_types = record_types;
        self
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Cached DNS data for `subject`, resolving on a miss.
    ///
    /// `last_accessed_at` decides whether a background refresh is planned
    /// for freshly resolved data.
    pub async fn lookup(
        &self,
        subject: &str,
        last_accessed_at: Option<Timestamp>,
    ) -> FreshetResult<CacheLookup<DnsSnapshot>> {
        let subject = normalize_subject(subject);
        let key = CacheKey::for_category(CacheCategory::DnsRecords, &subject)?;
        let ttl = self.scheduler.ttl_config().dns_default;

        let mut request = CacheRequest::new(key, ttl);
        if let Some(durable) = &self.durable {
            request = request.with_durable(Arc::clone(durable));
        }

        let resolver = Arc::clone(&self.resolver);
        let scheduler = self.scheduler.clone();
        let queue = self.queue.clone();
        let record_types = self.record_types.clone();

        self.cache
            .get_or_create(request, move || async move {
                let resolution = resolver
                    .resolve(&subject, &record_types)
                    .await
                    .map_err(FreshetError::from)?;

                let now = Utc::now();
                let expires_at = snapshot_expiry(&scheduler, now, &resolution.records);
                let entry_ttl = (expires_at - now)
                    .to_std()
                    .unwrap_or(scheduler.ttl_config().dns_min);

                if let Some(queue) = queue {
                    if let Some(task) = scheduler.plan(
                        now,
                        subject.as_str(),
                        CacheCategory::DnsRecords,
                        [expires_at],
                        last_accessed_at,
                    ) {
                        enqueue_soft(queue.as_ref(), task).await;
                    }
                }

                Ok(Produced::found(DnsSnapshot {
                    subject: resolution.subject,
                    records: resolution.records,
                    resolver_used: resolution.resolver_used,
                    resolved_at: resolution.resolved_at,
                    expires_at,
                })
                .with_ttl(entry_ttl))
            })
            .await
    }

    /// Drop the cached entry and resolve again.
    pub async fn refresh(
        &self,
        subject: &str,
        last_accessed_at: Option<Timestamp>,
    ) -> FreshetResult<CacheLookup<DnsSnapshot>> {
        let key = CacheKey::for_category(CacheCategory::DnsRecords, normalize_subject(subject))?;
        if let Err(e) = self.cache.invalidate(&key).await {
            warn!(key = %key, error = %e, "Invalidation failed before refresh");
        }
        self.lookup(subject, last_accessed_at).await
    }

    /// Run a task taken off the refresh queue.
    pub async fn revalidate(&self, task: &RevalidationTask) -> FreshetResult<CacheLookup<DnsSnapshot>> {
        debug!(idempotency_key = %task.idempotency_key(), "Revalidating");
        self.refresh(&task.subject_key, task.last_accessed_at).await
    }

    /// Subjects that currently have cached DNS data.
    pub async fn cached_subjects(&self) -> FreshetResult<Vec<String>> {
        let category = CacheCategory::DnsRecords;
        self.cache
            .scan_subjects(category.namespace(), category.as_str())
            .await
    }
}

impl std::fmt::Debug for DnsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsCache")
            .field("resolver", &self.resolver)
            .field("record_types", &self.record_types)
            .field("queue", &self.queue.is_some())
            .field("durable", &self.durable.is_some())
            .finish()
    }
}

/// Earliest clamped expiry across `records`; the default TTL when empty.
pub fn snapshot_expiry(scheduler: &FreshnessScheduler, now: Timestamp, records: &[UpstreamRecord]) -> Timestamp {
    FreshnessScheduler::earliest_due(records.iter().map(|r| scheduler.compute_expiry(now, r.ttl)))
        .unwrap_or_else(|| scheduler.compute_expiry(now, None))
}

async fn enqueue_soft(queue: &dyn RefreshQueue, task: RevalidationTask) {
    let idempotency_key = task.idempotency_key();
    match queue.enqueue(task).await {
        Ok(true) => debug!(idempotency_key = %idempotency_key, "Revalidation scheduled"),
        Ok(false) => debug!(idempotency_key = %idempotency_key, "Revalidation already scheduled"),
        Err(e) => warn!(idempotency_key = %idempotency_key, error = %e, "Failed to schedule revalidation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_snapshot_expiry_takes_minimum_clamped() {
        let scheduler = FreshnessScheduler::default();
        let now = Utc::now();
        let records = vec![
            UpstreamRecord::new(RecordType::A, "example.com", "1.1.1.1").with_ttl(600),
            UpstreamRecord::new(RecordType::MX, "example.com", "mx.example.com").with_ttl(5),
            UpstreamRecord::new(RecordType::TXT, "example.com", "v").with_ttl(u32::MAX),
        ];
        // 5s clamps up to the 60s floor.
        assert_eq!(snapshot_expiry(&scheduler, now, &records), now + ChronoDuration::seconds(60));
    }

    #[test]
    fn test_snapshot_expiry_empty_uses_default() {
        let scheduler = FreshnessScheduler::default();
        let now = Utc::now();
        assert_eq!(snapshot_expiry(&scheduler, now, &[]), now + ChronoDuration::seconds(3600));
    }
}
