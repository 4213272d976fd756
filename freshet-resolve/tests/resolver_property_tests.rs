//! Property-Based Tests for Multi-Provider Resolution
//!
//! **Property 1: Deterministic provider choice**
//! Resolving the same subject twice against the same providers reports the
//! same `resolver_used` and the same records, whatever the subject's case.
//!
//! **Property 2: Fall-through**
//! A provider that errors, times out or returns a malformed envelope is
//! skipped; the first provider that answers wins.
//!
//! **Property 3: Normalized output**
//! Records come back deduplicated, grouped by requested type, with MX
//! priorities ascending.
//!
//! **Property 4: Coalesced cached lookups**
//! Concurrent cached lookups for one subject resolve upstream once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use freshet_resolve::{
    CdnRanges, DnsCache, DnsProvider, QueryAnswer, RangeCache, RangeSource, Resolver,
};
use freshet_storage::{FreshnessScheduler, InMemoryRefreshQueue};
use freshet_test_utils::assertions::*;
use freshet_test_utils::fixtures::*;
use freshet_test_utils::generators::*;
use freshet_test_utils::{
    CacheLookup, FreshetResult, RecordType, ResolveError, ScriptedProvider, UpstreamRecord,
};
use futures_util::future::join_all;
use proptest::prelude::*;
use tokio::runtime::Runtime;

const TIMEOUT: Duration = Duration::from_secs(2);

fn resolver(providers: &[Arc<ScriptedProvider>]) -> Resolver {
    let providers: Vec<Arc<dyn DnsProvider>> = providers
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn DnsProvider>)
        .collect();
    Resolver::new(providers, TIMEOUT)
}

/// Scripted provider answering every type present in `records`.
fn provider_with(id: &str, records: &[UpstreamRecord]) -> ScriptedProvider {
    let mut provider = ScriptedProvider::new(id);
    for record_type in [
        RecordType::A,
        RecordType::AAAA,
        RecordType::CNAME,
        RecordType::MX,
        RecordType::NS,
        RecordType::TXT,
    ] {
        let of_type: Vec<UpstreamRecord> = records
            .iter()
            .filter(|r| r.record_type == record_type)
            .cloned()
            .collect();
        provider = provider.with_records(record_type, of_type);
    }
    provider
}

// ============================================================================
// RESOLUTION SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_example_test_falls_through_to_second_provider() {
    let (provider1, provider2) = example_test_providers();
    let resolver = resolver(&[Arc::clone(&provider1), Arc::clone(&provider2)]);

    let resolution = resolver
        .resolve("example.test", &[RecordType::A, RecordType::MX])
        .await
        .expect("provider2 answers");

    assert_eq!(resolution.resolver_used, "provider2");
    assert_eq!(resolution.subject, "example.test");
    assert!(!resolution.nxdomain);

    let a: Vec<_> = resolution
        .records
        .iter()
        .filter(|r| r.record_type == RecordType::A)
        .collect();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].value, "192.0.2.10");

    let mx: Vec<_> = resolution
        .records
        .iter()
        .filter(|r| r.record_type == RecordType::MX)
        .map(|r| r.priority)
        .collect();
    assert_eq!(mx, vec![Some(10), Some(20)]);
    assert_grouped_by_type(&resolution.records, &[RecordType::A, RecordType::MX]);
}

#[tokio::test]
async fn test_subject_normalized_before_query() {
    let provider = Arc::new(ScriptedProvider::new("only"));
    let resolver = resolver(&[Arc::clone(&provider)]);

    let resolution = resolver
        .resolve("  Example.TEST. ", &[RecordType::A])
        .await
        .expect("resolves");

    assert_eq!(resolution.subject, "example.test");
    assert_eq!(provider.queried(), vec![("example.test".to_string(), RecordType::A)]);
}

#[tokio::test]
async fn test_duplicate_types_queried_once() {
    let provider = Arc::new(ScriptedProvider::new("only"));
    let resolver = resolver(&[Arc::clone(&provider)]);

    resolver
        .resolve("example.test", &[RecordType::TXT, RecordType::TXT, RecordType::A])
        .await
        .expect("resolves");

    assert_eq!(provider.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_provider_times_out_and_falls_through() {
    let slow = Arc::new(
        ScriptedProvider::new("slow")
            .with_records(RecordType::A, vec![a_record("example.test", "198.51.100.1")])
            .with_delay(Duration::from_secs(30)),
    );
    let fast = Arc::new(
        ScriptedProvider::new("fast")
            .with_records(RecordType::A, vec![a_record("example.test", "192.0.2.1")]),
    );
    let resolver = resolver(&[Arc::clone(&slow), Arc::clone(&fast)]);

    let resolution = resolver
        .resolve("example.test", &[RecordType::A])
        .await
        .expect("fast answers");

    assert_eq!(resolution.resolver_used, "fast");
    assert_eq!(resolution.records[0].value, "192.0.2.1");
}

#[tokio::test(start_paused = true)]
async fn test_every_provider_timing_out_fails() {
    let slow1 = Arc::new(ScriptedProvider::new("slow1").with_delay(Duration::from_secs(30)));
    let slow2 = Arc::new(ScriptedProvider::new("slow2").with_delay(Duration::from_secs(30)));
    let resolver = resolver(&[slow1, slow2]);

    let result = resolver.resolve("example.test", &[RecordType::A]).await;
    assert_all_providers_failed(&result, 2);
    if let Err(ResolveError::AllProvidersFailed { last_error, .. }) = result {
        assert!(last_error.contains("timed out"), "last error: {last_error}");
    }
}

#[tokio::test]
async fn test_malformed_envelope_falls_through() {
    let malformed = Arc::new(ScriptedProvider::new("provider1").with_answer(
        RecordType::A,
        Err(ResolveError::MalformedEnvelope {
            provider: "provider1".to_string(),
            reason: "Answer is not a list".to_string(),
        }),
    ));
    let healthy = Arc::new(
        ScriptedProvider::new("provider2")
            .with_records(RecordType::A, vec![a_record("example.test", "192.0.2.7")]),
    );
    let resolver = resolver(&[malformed, healthy]);

    let resolution = resolver
        .resolve("example.test", &[RecordType::A])
        .await
        .expect("healthy provider answers");
    assert_eq!(resolution.resolver_used, "provider2");
}

#[tokio::test]
async fn test_one_failing_type_fails_the_whole_provider() {
    let partial = Arc::new(
        ScriptedProvider::new("partial")
            .with_records(RecordType::A, vec![a_record("example.test", "203.0.113.1")])
            .with_answer(
                RecordType::TXT,
                Err(ResolveError::ProviderFailed {
                    provider: "partial".to_string(),
                    reason: "HTTP 502".to_string(),
                }),
            ),
    );
    let complete = Arc::new(
        ScriptedProvider::new("complete")
            .with_records(RecordType::A, vec![a_record("example.test", "192.0.2.1")]),
    );
    let resolver = resolver(&[partial, complete]);

    let resolution = resolver
        .resolve("example.test", &[RecordType::A, RecordType::TXT])
        .await
        .expect("complete answers");

    assert_eq!(resolution.resolver_used, "complete");
    assert!(resolution.records.iter().all(|r| r.value != "203.0.113.1"));
}

#[tokio::test]
async fn test_nxdomain_is_success_with_no_records() {
    let provider = Arc::new(ScriptedProvider::new("only").with_default(Ok(QueryAnswer::nxdomain())));
    let resolver = resolver(&[Arc::clone(&provider)]);

    let resolution = resolver
        .resolve("missing.test", &[RecordType::A, RecordType::MX])
        .await
        .expect("nxdomain is an answer");

    assert!(resolution.nxdomain);
    assert!(resolution.records.is_empty());
    assert_eq!(resolution.resolver_used, "only");
}

#[tokio::test]
async fn test_all_providers_failing() {
    let resolver = resolver(&[
        Arc::new(ScriptedProvider::failing("provider1", "HTTP 500")),
        Arc::new(ScriptedProvider::failing("provider2", "HTTP 503")),
    ]);
    let result = resolver.resolve("example.test", &[RecordType::A]).await;
    assert_all_providers_failed(&result, 2);
}

#[tokio::test]
async fn test_no_providers() {
    let resolver = resolver(&[]);
    let result = resolver.resolve("example.test", &[RecordType::A]).await;
    assert!(matches!(result, Err(ResolveError::NoProviders { .. })));
}

// ============================================================================
// CDN ANNOTATION
// ============================================================================

struct StaticRanges;

#[async_trait]
impl RangeSource for StaticRanges {
    fn name(&self) -> &str {
        "cloudflare"
    }

    async fn fetch(&self) -> FreshetResult<CdnRanges> {
        Ok(CdnRanges::parse("cloudflare", "192.0.2.0/24\n2001:db8::/32\n"))
    }
}

#[tokio::test]
async fn test_addresses_in_cdn_ranges_are_annotated() {
    let provider = Arc::new(
        ScriptedProvider::new("only")
            .with_records(
                RecordType::A,
                vec![
                    a_record("example.test", "192.0.2.10"),
                    a_record("example.test", "198.51.100.10"),
                ],
            )
            .with_records(RecordType::TXT, vec![txt_record("example.test", "192.0.2.10")]),
    );
    let ranges = Arc::new(RangeCache::new(
        test_cache(),
        Arc::new(StaticRanges),
        Duration::from_secs(3600),
    ));
    let resolver = resolver(&[provider]).with_ranges(ranges);

    let resolution = resolver
        .resolve("example.test", &[RecordType::A, RecordType::TXT])
        .await
        .expect("resolves");

    let cdn: Vec<(&str, Option<&str>)> = resolution
        .records
        .iter()
        .map(|r| (r.value.as_str(), r.cdn.as_deref()))
        .collect();
    assert_eq!(
        cdn,
        vec![
            ("192.0.2.10", Some("cloudflare")),
            ("198.51.100.10", None),
            ("192.0.2.10", None),
        ]
    );
}

// ============================================================================
// CACHED LOOKUPS
// ============================================================================

fn dns_cache(provider: Arc<ScriptedProvider>) -> DnsCache {
    DnsCache::new(
        test_cache(),
        Arc::new(resolver(&[provider])),
        FreshnessScheduler::default(),
    )
    .with_record_types(vec![RecordType::A, RecordType::MX])
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_cached_lookups_resolve_once() {
    let provider = Arc::new(
        ScriptedProvider::new("provider2")
            .with_records(RecordType::A, vec![a_record("example.test", "192.0.2.10")])
            .with_delay(Duration::from_millis(100)),
    );
    let cache = dns_cache(Arc::clone(&provider));

    let lookups = (0..16).map(|_| cache.lookup("example.test", None));
    let results = join_all(lookups).await;

    // One production covers both record types.
    assert_eq!(provider.calls(), 2);
    let first = results[0].as_ref().expect("lookup").clone();
    for result in &results {
        assert_eq!(result.as_ref().expect("lookup"), &first);
    }
    assert_eq!(first.value().map(|s| s.records.len()), Some(1));
}

#[tokio::test]
async fn test_cached_lookup_hits_after_first_resolution() {
    let (_, provider2) = example_test_providers();
    let cache = dns_cache(Arc::clone(&provider2));

    let first = cache.lookup("Example.test", None).await.expect("lookup");
    let second = cache.lookup("example.test", None).await.expect("lookup");

    assert_eq!(first, second);
    assert_eq!(provider2.calls(), 2);
    let snapshot = first.into_value().expect("value");
    assert_eq!(snapshot.resolver_used, "provider2");
    assert_mx_ascending(&snapshot.records);
    assert!(snapshot.expires_at > snapshot.resolved_at);
}

#[tokio::test]
async fn test_recently_read_subject_schedules_revalidation() {
    let (_, provider2) = example_test_providers();
    let queue = Arc::new(InMemoryRefreshQueue::new());
    let cache = dns_cache(provider2).with_queue(queue.clone());

    let lookup = cache
        .lookup("example.test", Some(Utc::now()))
        .await
        .expect("lookup");
    let snapshot = lookup.into_value().expect("value");

    let pending = queue.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].subject_key, "example.test");
    assert_eq!(pending[0].due_at, snapshot.expires_at);

    // A cache hit does not produce, so nothing new is planned.
    cache
        .lookup("example.test", Some(Utc::now()))
        .await
        .expect("lookup");
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_never_read_subject_is_not_scheduled() {
    let (_, provider2) = example_test_providers();
    let queue = Arc::new(InMemoryRefreshQueue::new());
    let cache = dns_cache(provider2).with_queue(queue.clone());

    cache.lookup("example.test", None).await.expect("lookup");
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_refresh_resolves_again() {
    let (_, provider2) = example_test_providers();
    let cache = dns_cache(Arc::clone(&provider2));

    cache.lookup("example.test", None).await.expect("lookup");
    cache.refresh("example.test", None).await.expect("refresh");
    assert_eq!(provider2.calls(), 4);

    assert_eq!(cache.cached_subjects().await.expect("scan"), vec!["example.test"]);
}

#[tokio::test]
async fn test_cached_lookup_surfaces_total_failure() {
    let cache = dns_cache(Arc::new(ScriptedProvider::failing("provider1", "HTTP 500")));
    let result = cache.lookup("example.test", None).await;
    assert_err(&result);

    // Failures are not cached.
    let again = cache.lookup("example.test", None).await;
    assert!(!matches!(again, Ok(CacheLookup::Value(_))));
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property 1: same subject, same providers, same answer.
    #[test]
    fn prop_resolution_is_deterministic(
        subject in arb_mixed_case_subject(),
        records in arb_records(12),
    ) {
        let rt = Runtime::new().expect("runtime");
        let providers = [
            Arc::new(provider_with("cloudflare", &records)),
            Arc::new(provider_with("google", &records)),
            Arc::new(provider_with("quad9", &records)),
        ];
        let resolver = resolver(&providers);
        let types = [RecordType::A, RecordType::MX, RecordType::TXT];

        let first = rt.block_on(resolver.resolve(&subject, &types)).expect("resolves");
        let second = rt
            .block_on(resolver.resolve(&subject.to_lowercase(), &types))
            .expect("resolves");

        prop_assert_eq!(&first.resolver_used, &second.resolver_used);
        prop_assert_eq!(&first.records, &second.records);
    }

    /// Property 3: output is grouped, sorted and free of duplicates.
    #[test]
    fn prop_resolution_is_normalized(records in arb_records(16)) {
        let rt = Runtime::new().expect("runtime");
        let resolver = resolver(&[Arc::new(provider_with("only", &records))]);
        let types = [RecordType::MX, RecordType::A, RecordType::TXT, RecordType::NS];

        let resolution = rt
            .block_on(resolver.resolve("example.test", &types))
            .expect("resolves");

        assert_grouped_by_type(&resolution.records, &types);
        assert_mx_ascending(&resolution.records);
        let unique: HashSet<_> = resolution.records.iter().map(|r| r.uniqueness_key()).collect();
        prop_assert_eq!(unique.len(), resolution.records.len());
        prop_assert!(resolution
            .records
            .iter()
            .all(|r| types.contains(&r.record_type)));
    }

    /// Property 2: failing providers never win.
    #[test]
    fn prop_failing_providers_are_skipped(
        subject in arb_subject(),
        failing in 0usize..4,
    ) {
        let rt = Runtime::new().expect("runtime");
        let mut providers: Vec<Arc<ScriptedProvider>> = (0..failing)
            .map(|i| Arc::new(ScriptedProvider::failing(format!("down-{i}"), "HTTP 503")))
            .collect();
        providers.push(Arc::new(ScriptedProvider::new("up")));
        let resolver = resolver(&providers);

        let resolution = rt
            .block_on(resolver.resolve(&subject, &[RecordType::A]))
            .expect("one provider is up");
        prop_assert_eq!(resolution.resolver_used, "up");
    }
}
