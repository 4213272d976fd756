//! Upstream record model and type-aware normalization.
//!
//! Records coming back from several providers are deduplicated on
//! `(type, name, value, priority)` and ordered per type. Names are always
//! compared case-insensitively; values too, except for TXT whose payload is
//! case-sensitive by protocol definition.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// DNS resource record types handled by the engine.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    MX,
    TXT,
    AAAA,
}

impl RecordType {
    pub const ALL: [RecordType; 6] = [
        RecordType::A,
        RecordType::AAAA,
        RecordType::CNAME,
        RecordType::MX,
        RecordType::NS,
        RecordType::TXT,
    ];

    /// Wire type number.
    pub fn code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(RecordType::A),
            2 => Some(RecordType::NS),
            5 => Some(RecordType::CNAME),
            15 => Some(RecordType::MX),
            16 => Some(RecordType::TXT),
            28 => Some(RecordType::AAAA),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::NS => "NS",
            RecordType::CNAME => "CNAME",
            RecordType::MX => "MX",
            RecordType::TXT => "TXT",
            RecordType::AAAA => "AAAA",
        }
    }

    /// Parse a mnemonic (any case) or a numeric type.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(code) = raw.parse::<u16>() {
            return Self::from_code(code);
        }
        Self::ALL
            .into_iter()
            .find(|t| t.mnemonic().eq_ignore_ascii_case(raw))
    }

    /// Whether record values of this type are case-sensitive.
    pub fn value_is_case_sensitive(&self) -> bool {
        matches!(self, RecordType::TXT)
    }

    /// Whether records of this type carry an explicit priority.
    pub fn carries_priority(&self) -> bool {
        matches!(self, RecordType::MX)
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A single record returned by an upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRecord {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    /// CDN that announces the address, for A/AAAA records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn: Option<String>,
}

impl UpstreamRecord {
    pub fn new(record_type: RecordType, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            record_type,
            name: name.into(),
            value: value.into(),
            ttl: None,
            priority: None,
            cdn: None,
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Lower-cased, trimmed owner name.
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// Trimmed value, lower-cased unless the type is case-sensitive.
    pub fn normalized_value(&self) -> String {
        let trimmed = self.value.trim();
        if self.record_type.value_is_case_sensitive() {
            trimmed.to_string()
        } else {
            trimmed.to_lowercase()
        }
    }

    /// Identity used for deduplication.
    pub fn uniqueness_key(&self) -> RecordKey {
        RecordKey {
            record_type: self.record_type,
            name: self.normalized_name(),
            value: self.normalized_value(),
            priority: self.priority,
        }
    }

    fn sort_priority(&self) -> u16 {
        self.priority.unwrap_or(u16::MAX)
    }
}

/// `(type, normalizedName, normalizedValue, priority)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub record_type: RecordType,
    pub name: String,
    pub value: String,
    pub priority: Option<u16>,
}

/// Drop duplicate records, keeping the first occurrence of each.
pub fn deduplicate(records: Vec<UpstreamRecord>) -> Vec<UpstreamRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| seen.insert(record.uniqueness_key()))
        .collect()
}

/// Group records by type in `type_order`, then sort each group.
///
/// Types missing from `type_order` follow in first-seen order. Priority
/// types sort by ascending priority (missing priority last), then value;
/// every other type sorts by value.
pub fn sort_by_type(records: Vec<UpstreamRecord>, type_order: &[RecordType]) -> Vec<UpstreamRecord> {
    let mut order: Vec<RecordType> = Vec::with_capacity(type_order.len());
    for record_type in type_order {
        if !order.contains(record_type) {
            order.push(*record_type);
        }
    }

    let mut buckets: HashMap<RecordType, Vec<UpstreamRecord>> = HashMap::new();
    for record in records {
        if !order.contains(&record.record_type) {
            order.push(record.record_type);
        }
        buckets.entry(record.record_type).or_default().push(record);
    }

    let mut sorted = Vec::new();
    for record_type in order {
        let Some(mut bucket) = buckets.remove(&record_type) else {
            continue;
        };
        if record_type.carries_priority() {
            bucket.sort_by(|a, b| {
                a.sort_priority()
                    .cmp(&b.sort_priority())
                    .then_with(|| a.value.trim().cmp(b.value.trim()))
            });
        } else {
            bucket.sort_by(|a, b| a.value.trim().cmp(b.value.trim()));
        }
        sorted.extend(bucket);
    }
    sorted
}

/// Deduplicate then sort, trimming values on the way through.
pub fn normalize(records: Vec<UpstreamRecord>, type_order: &[RecordType]) -> Vec<UpstreamRecord> {
    let trimmed = records
        .into_iter()
        .map(|mut record| {
            record.name = record.name.trim().trim_end_matches('.').to_string();
            record.value = record.value.trim().to_string();
            record
        })
        .collect();
    sort_by_type(deduplicate(trimmed), type_order)
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn record_strategy() -> impl Strategy<Value = UpstreamRecord> {
        (
            prop::sample::select(RecordType::ALL.to_vec()),
            "[a-zA-Z]{1,6}\\.com",
            "[a-zA-Z0-9]{1,8}",
            prop::option::of(0u16..100),
        )
            .prop_map(|(record_type, name, value, priority)| {
                let mut record = UpstreamRecord::new(record_type, name, value);
                record.priority = priority;
                record
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        /// Property: deduplication is idempotent.
        #[test]
        fn prop_dedup_idempotent(records in prop::collection::vec(record_strategy(), 0..30)) {
            let once = deduplicate(records);
            let twice = deduplicate(once.clone());
            prop_assert_eq!(once, twice);
        }

        /// Property: sorting is a permutation of its input.
        #[test]
        fn prop_sort_is_permutation(records in prop::collection::vec(record_strategy(), 0..30)) {
            let sorted = sort_by_type(records.clone(), &[RecordType::MX, RecordType::A]);
            prop_assert_eq!(sorted.len(), records.len());
            for record in &records {
                let expected = records.iter().filter(|r| *r == record).count();
                let actual = sorted.iter().filter(|r| *r == record).count();
                prop_assert_eq!(expected, actual);
            }
        }

        /// Property: MX records come out in non-decreasing priority order.
        #[test]
        fn prop_mx_priority_monotonic(records in prop::collection::vec(record_strategy(), 0..30)) {
            let sorted = sort_by_type(records, &[RecordType::MX]);
            let priorities: Vec<u16> = sorted
                .iter()
                .filter(|r| r.record_type == RecordType::MX)
                .map(|r| r.priority.unwrap_or(u16::MAX))
                .collect();
            prop_assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
