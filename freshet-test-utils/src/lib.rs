//! Freshet Test Utilities
//!
//! Shared test infrastructure for the freshet workspace:
//! - Scripted DNS providers and verification probes
//! - Durable-tier, store and step-runtime doubles
//! - Proptest generators for records and subjects
//! - Fixtures and assertions for common scenarios

pub use freshet_core::{
    CacheCategory, CacheConfig, CacheKey, FreshetError, FreshetResult, RecordType, ResolveError,
    StorageError, Tier, Timestamp, TtlConfig, UpstreamRecord, VerificationError,
};
pub use freshet_resolve::{DnsProvider, QueryAnswer};
pub use freshet_storage::{CacheLookup, DurableTier, InMemoryFastTier, TieredCache};
pub use freshet_verify::{
    InMemoryVerificationStore, MethodProbe, StepError, StepRuntime, SubjectSnapshot,
    VerificationAttempt, VerificationMethod, VerificationStore,
};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use freshet_storage::CacheValue;
use uuid::Uuid;

// ============================================================================
// MOCK PROVIDERS
// ============================================================================

/// DNS provider answering from a script, one answer per record type.
///
/// Unscripted types get an empty answer unless a default is set.
pub struct ScriptedProvider {
    id: String,
    answers: HashMap<RecordType, Result<QueryAnswer, ResolveError>>,
    default: Result<QueryAnswer, ResolveError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    queried: Mutex<Vec<(String, RecordType)>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            answers: HashMap::new(),
            default: Ok(QueryAnswer::empty()),
            delay: None,
            calls: AtomicUsize::new(0),
            queried: Mutex::new(Vec::new()),
        }
    }

    /// A provider that fails every query.
    pub fn failing(id: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut provider = Self::new(id);
        provider.default = Err(ResolveError::ProviderFailed {
            provider: provider.id.clone(),
            reason: reason.into(),
        });
        provider
    }

    pub fn with_records(self, record_type: RecordType, records: Vec<UpstreamRecord>) -> Self {
        self.with_answer(record_type, Ok(QueryAnswer::records(records)))
    }

    pub fn with_answer(mut self, record_type: RecordType, answer: Result<QueryAnswer, ResolveError>) -> Self {
        self.answers.insert(record_type, answer);
        self
    }

    /// Answer for every type that has no scripted answer.
    pub fn with_default(mut self, answer: Result<QueryAnswer, ResolveError>) -> Self {
        self.default = answer;
        self
    }

    /// Sleep on the tokio clock before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queried(&self) -> Vec<(String, RecordType)> {
        self.queried.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DnsProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn query(&self, subject: &str, record_type: RecordType) -> Result<QueryAnswer, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queried) = self.queried.lock() {
            queried.push((subject.to_string(), record_type));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .get(&record_type)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

// ============================================================================
// MOCK STORAGE
// ============================================================================

/// Durable tier backed by a map, with switchable failures.
pub struct MemoryDurableTier<T> {
    values: RwLock<HashMap<String, T>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fetches: AtomicUsize,
    persists: AtomicUsize,
}

impl<T: CacheValue> MemoryDurableTier<T> {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            persists: AtomicUsize::new(0),
        }
    }

    pub fn seeded(key: &CacheKey, value: T) -> Self {
        let tier = Self::new();
        if let Ok(mut values) = tier.values.write() {
            values.insert(key.encode(), value);
        }
        tier
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, key: &CacheKey) -> Option<T> {
        self.values.read().ok()?.get(&key.encode()).cloned()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Completed writes; failed writes are not counted.
    pub fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: CacheValue> DurableTier<T> for MemoryDurableTier<T> {
    async fn fetch(&self, key: &CacheKey) -> FreshetResult<Option<T>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed {
                tier: Tier::Durable,
                key: key.encode(),
                reason: "injected read failure".to_string(),
            }
            .into());
        }
        Ok(self.get(key))
    }

    async fn persist(&self, key: &CacheKey, value: &T) -> FreshetResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                tier: Tier::Durable,
                key: key.encode(),
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        let mut values = self.values.write().map_err(|_| StorageError::LockPoisoned)?;
        values.insert(key.encode(), value.clone());
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Verification store with injectable write failures.
#[derive(Debug)]
pub struct FaultyStore {
    inner: InMemoryVerificationStore,
    fail_mark_verified: AtomicBool,
    /// Saves numbered at or above this fail.
    fail_saves_from: AtomicUsize,
    saves: AtomicUsize,
}

impl Default for FaultyStore {
    fn default() -> Self {
        Self {
            inner: InMemoryVerificationStore::new(),
            fail_mark_verified: AtomicBool::new(false),
            fail_saves_from: AtomicUsize::new(usize::MAX),
            saves: AtomicUsize::new(0),
        }
    }
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryVerificationStore {
        &self.inner
    }

    pub fn set_fail_mark_verified(&self, fail: bool) {
        self.fail_mark_verified.store(fail, Ordering::SeqCst);
    }

    /// Fail every save once `count` saves have succeeded.
    pub fn fail_saves_after(&self, count: usize) {
        self.fail_saves_from.store(count, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_saves_from.store(usize::MAX, Ordering::SeqCst);
        self.fail_mark_verified.store(false, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationStore for FaultyStore {
    async fn load_subject(&self, subject_id: Uuid) -> FreshetResult<Option<SubjectSnapshot>> {
        self.inner.load_subject(subject_id).await
    }

    async fn load_attempt(&self, subject_id: Uuid) -> FreshetResult<Option<VerificationAttempt>> {
        self.inner.load_attempt(subject_id).await
    }

    async fn save_attempt(&self, attempt: &VerificationAttempt) -> FreshetResult<()> {
        if self.saves.load(Ordering::SeqCst) >= self.fail_saves_from.load(Ordering::SeqCst) {
            return Err(StorageError::TransactionFailed {
                reason: "injected save failure".to_string(),
            }
            .into());
        }
        self.inner.save_attempt(attempt).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_verified(
        &self,
        subject_id: Uuid,
        method: VerificationMethod,
        verified_at: Timestamp,
    ) -> FreshetResult<()> {
        if self.fail_mark_verified.load(Ordering::SeqCst) {
            return Err(StorageError::TransactionFailed {
                reason: "injected mark failure".to_string(),
            }
            .into());
        }
        self.inner.mark_verified(subject_id, method, verified_at).await
    }

    async fn pending_subjects(&self, limit: usize) -> FreshetResult<Vec<Uuid>> {
        self.inner.pending_subjects(limit).await
    }
}

// ============================================================================
// MOCK VERIFICATION
// ============================================================================

/// Probe with a scripted outcome that records every check.
pub struct ScriptedProbe {
    method: VerificationMethod,
    /// 1-based call on which the probe starts succeeding.
    succeed_on: Option<usize>,
    /// Only this token proves ownership, when set.
    accepted_token: Option<String>,
    error: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, String)>>,
}

impl ScriptedProbe {
    fn build(method: VerificationMethod) -> Self {
        Self {
            method,
            succeed_on: None,
            accepted_token: None,
            error: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn never(method: VerificationMethod) -> Self {
        Self::build(method)
    }

    pub fn succeeds_on(method: VerificationMethod, call: usize) -> Self {
        Self {
            succeed_on: Some(call),
            ..Self::build(method)
        }
    }

    /// Succeeds whenever the checked token equals `token`.
    pub fn accepts(method: VerificationMethod, token: impl Into<String>) -> Self {
        Self {
            accepted_token: Some(token.into()),
            ..Self::build(method)
        }
    }

    /// Every check errors.
    pub fn broken(method: VerificationMethod) -> Self {
        Self {
            error: true,
            ..Self::build(method)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(domain, token)` of every check, in order.
    pub fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MethodProbe for ScriptedProbe {
    fn method(&self) -> VerificationMethod {
        self.method
    }

    async fn check(&self, domain: &str, token: &str) -> Result<bool, VerificationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((domain.to_string(), token.to_string()));
        }
        if self.error {
            return Err(VerificationError::ProbeFailed {
                method: self.method.to_string(),
                domain: domain.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        if let Some(accepted) = &self.accepted_token {
            return Ok(accepted == token);
        }
        Ok(self.succeed_on.is_some_and(|n| call >= n))
    }
}

/// Step runtime on a virtual clock.
///
/// `sleep_until` jumps the clock forward instead of waiting, so a thirty
/// day schedule runs instantly. Every sleep and step name is recorded.
pub struct RecordingRuntime {
    clock: Mutex<Timestamp>,
    sleeps: Mutex<Vec<Timestamp>>,
    steps: Mutex<Vec<String>>,
    max_retries: u32,
}

impl RecordingRuntime {
    pub fn new(start: Timestamp) -> Self {
        Self {
            clock: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
            steps: Mutex::new(Vec::new()),
            max_retries: 0,
        }
    }

    /// Retry retryable steps up to `max_retries` times, without waiting.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Move the clock forward, e.g. to model downtime.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut clock) = self.clock.lock() {
            *clock += freshet_core::chrono_duration(by);
        }
    }

    pub fn sleeps(&self) -> Vec<Timestamp> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for RecordingRuntime {
    fn default() -> Self {
        Self::new(fixtures::epoch())
    }
}

#[async_trait]
impl StepRuntime for RecordingRuntime {
    fn now(&self) -> Timestamp {
        self.clock.lock().map(|c| *c).unwrap_or_else(|_| Utc::now())
    }

    async fn sleep_until(&self, wake_at: Timestamp) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(wake_at);
        }
        if let Ok(mut clock) = self.clock.lock() {
            if wake_at > *clock {
                *clock = wake_at;
            }
        }
    }

    async fn run_step<T, F, Fut>(&self, name: &str, step: F) -> Result<T, StepError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, StepError>> + Send,
    {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(name.to_string());
        }
        let mut attempt = 0;
        loop {
            match step().await {
                Err(StepError::Retryable(_)) if attempt < self.max_retries => attempt += 1,
                result => return result,
            }
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_subject() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,20}(\\.[a-z]{2,6}){1,2}"
    }

    /// Subject with random letter case.
    pub fn arb_mixed_case_subject() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9-]{0,20}(\\.[a-zA-Z]{2,6}){1,2}"
    }

    pub fn arb_record_type() -> impl Strategy<Value = RecordType> {
        prop_oneof![
            Just(RecordType::A),
            Just(RecordType::AAAA),
            Just(RecordType::CNAME),
            Just(RecordType::MX),
            Just(RecordType::NS),
            Just(RecordType::TXT),
        ]
    }

    /// Provider TTLs including the lies: zero and absurdly large.
    pub fn arb_provider_ttl() -> impl Strategy<Value = Option<u32>> {
        prop_oneof![
            Just(None),
            Just(Some(0)),
            Just(Some(u32::MAX)),
            any::<u32>().prop_map(Some),
        ]
    }

    pub fn arb_record() -> impl Strategy<Value = UpstreamRecord> {
        (
            arb_record_type(),
            "[a-zA-Z]{1,8}\\.example",
            "[a-zA-Z0-9.]{1,16}",
            arb_provider_ttl(),
            proptest::option::of(0u16..100),
        )
            .prop_map(|(record_type, name, value, ttl, priority)| {
                let mut record = UpstreamRecord::new(record_type, name, value);
                record.ttl = ttl;
                if record_type == RecordType::MX {
                    record.priority = priority;
                }
                record
            })
    }

    pub fn arb_records(max: usize) -> impl Strategy<Value = Vec<UpstreamRecord>> {
        prop::collection::vec(arb_record(), 0..max)
    }

    pub fn arb_token() -> impl Strategy<Value = String> {
        "[A-Za-z0-9]{8,32}"
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use std::sync::Arc;

    /// Fixed start time for virtual clocks: 2024-01-01T00:00:00Z.
    pub fn epoch() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn a_record(name: &str, ip: &str) -> UpstreamRecord {
        UpstreamRecord::new(RecordType::A, name, ip)
    }

    pub fn mx_record(name: &str, host: &str, priority: u16) -> UpstreamRecord {
        UpstreamRecord::new(RecordType::MX, name, host).with_priority(priority)
    }

    pub fn txt_record(name: &str, value: &str) -> UpstreamRecord {
        UpstreamRecord::new(RecordType::TXT, name, value)
    }

    /// `provider1` fails everything; `provider2` answers `example.test`
    /// with a duplicated A record and two MX records out of order.
    pub fn example_test_providers() -> (Arc<ScriptedProvider>, Arc<ScriptedProvider>) {
        let provider1 = ScriptedProvider::failing("provider1", "connection refused");
        let provider2 = ScriptedProvider::new("provider2")
            .with_records(
                RecordType::A,
                vec![
                    a_record("example.test", "192.0.2.10"),
                    a_record("EXAMPLE.test", "192.0.2.10"),
                ],
            )
            .with_records(
                RecordType::MX,
                vec![
                    mx_record("example.test", "mx20.example.test", 20),
                    mx_record("example.test", "mx10.example.test", 10),
                ],
            );
        (Arc::new(provider1), Arc::new(provider2))
    }

    pub fn test_cache() -> TieredCache {
        TieredCache::new(Arc::new(InMemoryFastTier::new()), CacheConfig::default())
    }

    pub fn pending_subject(domain: &str, token: &str) -> SubjectSnapshot {
        SubjectSnapshot {
            subject_id: Uuid::now_v7(),
            domain: domain.to_string(),
            token: token.to_string(),
            verified: false,
            deleted: false,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert that a result is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &FreshetResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got {:?}", result);
    }

    /// Assert that a result is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &FreshetResult<T>) {
        assert!(result.is_err(), "Expected Err, got {:?}", result);
    }

    /// Assert that a cache lookup is a definitive "not found".
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(lookup: &CacheLookup<T>) {
        assert!(lookup.is_not_found(), "Expected NotFound, got {:?}", lookup);
    }

    /// Assert that every provider was tried and failed.
    #[track_caller]
    pub fn assert_all_providers_failed<T: std::fmt::Debug>(
        result: &Result<T, ResolveError>,
        attempted: usize,
    ) {
        match result {
            Err(ResolveError::AllProvidersFailed { attempted: got, .. }) => {
                assert_eq!(*got, attempted, "Expected {} providers attempted", attempted)
            }
            other => panic!("Expected AllProvidersFailed, got {:?}", other),
        }
    }

    /// Assert that records appear grouped by type in `order`.
    #[track_caller]
    pub fn assert_grouped_by_type(records: &[UpstreamRecord], order: &[RecordType]) {
        let rank = |t: RecordType| order.iter().position(|o| *o == t).unwrap_or(order.len());
        for pair in records.windows(2) {
            assert!(
                rank(pair[0].record_type) <= rank(pair[1].record_type),
                "{} record after {} record",
                pair[0].record_type,
                pair[1].record_type
            );
        }
    }

    /// Assert that MX priorities ascend, missing priorities last.
    #[track_caller]
    pub fn assert_mx_ascending(records: &[UpstreamRecord]) {
        let priorities: Vec<u16> = records
            .iter()
            .filter(|r| r.record_type == RecordType::MX)
            .map(|r| r.priority.unwrap_or(u16::MAX))
            .collect();
        assert!(
            priorities.windows(2).all(|w| w[0] <= w[1]),
            "MX priorities not ascending: {:?}",
            priorities
        );
    }
}
