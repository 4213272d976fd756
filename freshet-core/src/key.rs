//! Namespaced cache keys.
//!
//! Keys have the shape `<namespace>:<category>:<subject>`. The separator is
//! reserved: a segment containing it is rejected at construction time, which
//! keeps encoding injective. A `CacheKey` can only be built through the
//! validating constructors, so every key that reaches a cache tier is
//! well-formed.

use serde::{Deserialize, Serialize};

use crate::constants::{KEY_SEPARATOR, KEY_WILDCARD};
use crate::error::KeyError;

/// Number of segments in a typed cache key.
pub const KEY_SEGMENTS: usize = 3;

/// Result categories with their own namespace and TTL policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    DnsRecords,
    Certificate,
    Headers,
    Hosting,
    Seo,
    CdnRanges,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 6] = [
        CacheCategory::DnsRecords,
        CacheCategory::Certificate,
        CacheCategory::Headers,
        CacheCategory::Hosting,
        CacheCategory::Seo,
        CacheCategory::CdnRanges,
    ];

    /// First key segment.
    pub fn namespace(&self) -> &'static str {
        match self {
            CacheCategory::DnsRecords => "dns",
            CacheCategory::Certificate | CacheCategory::Headers => "http",
            CacheCategory::Hosting | CacheCategory::Seo => "site",
            CacheCategory::CdnRanges => "cdn",
        }
    }

    /// Second key segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::DnsRecords => "records",
            CacheCategory::Certificate => "certificate",
            CacheCategory::Headers => "headers",
            CacheCategory::Hosting => "hosting",
            CacheCategory::Seo => "seo",
            CacheCategory::CdnRanges => "ranges",
        }
    }
}

impl std::fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace(), self.as_str())
    }
}

/// A validated `<namespace>:<category>:<subject>` cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    inner: KeyInner,
}

/// Private inner struct - prevents construction without validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct KeyInner {
    namespace: String,
    category: String,
    subject: String,
}

impl CacheKey {
    /// Create a key from raw segments.
    ///
    /// The subject is trimmed and lower-cased so mixed-case identifiers map
    /// to the same key.
    pub fn new(
        namespace: impl Into<String>,
        category: impl Into<String>,
        subject: impl AsRef<str>,
    ) -> Result<Self, KeyError> {
        let namespace = namespace.into();
        let category = category.into();
        let subject = subject.as_ref().trim().to_lowercase();

        validate_segment(0, &namespace)?;
        validate_segment(1, &category)?;
        validate_segment(2, &subject)?;
        if subject == KEY_WILDCARD {
            return Err(KeyError::ReservedSeparator {
                segment: subject,
                separator: '*',
            });
        }

        Ok(Self {
            inner: KeyInner {
                namespace,
                category,
                subject,
            },
        })
    }

    /// Create a key for one of the known result categories.
    pub fn for_category(category: CacheCategory, subject: impl AsRef<str>) -> Result<Self, KeyError> {
        Self::new(category.namespace(), category.as_str(), subject)
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn category(&self) -> &str {
        &self.inner.category
    }

    pub fn subject(&self) -> &str {
        &self.inner.subject
    }

    /// Encode to the canonical string form.
    pub fn encode(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.inner.namespace,
            self.inner.category,
            self.inner.subject,
            sep = KEY_SEPARATOR
        )
    }

    /// Decode any well-formed three-segment key.
    ///
    /// Returns `None` for malformed input rather than failing.
    pub fn decode(raw: &str) -> Option<Self> {
        let segments: Vec<&str> = raw.split(KEY_SEPARATOR).collect();
        if segments.len() != KEY_SEGMENTS {
            return None;
        }
        // Decoding must not normalize: a key that was not produced by
        // `encode` (e.g. an upper-case subject) does not match.
        let key = Self::new(segments[0], segments[1], segments[2]).ok()?;
        if key.encode() != raw {
            return None;
        }
        Some(key)
    }

    /// Pattern matching every key under `namespace:category`.
    pub fn scan_pattern(namespace: &str, category: &str) -> Result<String, KeyError> {
        validate_segment(0, namespace)?;
        validate_segment(1, category)?;
        Ok(format!(
            "{namespace}{sep}{category}{sep}{KEY_WILDCARD}",
            sep = KEY_SEPARATOR
        ))
    }

    /// Literal prefix shared by every key under `namespace:category`.
    pub fn scan_prefix(namespace: &str, category: &str) -> Result<String, KeyError> {
        validate_segment(0, namespace)?;
        validate_segment(1, category)?;
        Ok(format!("{namespace}{sep}{category}{sep}", sep = KEY_SEPARATOR))
    }

    /// Extract the subject from a key returned by a batch scan.
    ///
    /// The key must have exactly three segments and its first two must equal
    /// `namespace` and `category`; anything else is "not matched".
    pub fn parse_subject(raw: &str, namespace: &str, category: &str) -> Option<String> {
        let key = Self::decode(raw)?;
        if key.namespace() != namespace || key.category() != category {
            return None;
        }
        Some(key.inner.subject)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Join arbitrary segments with the reserved separator.
///
/// Injective for valid input: every segment must be non-empty and free of
/// the separator.
pub fn encode_segments(segments: &[&str]) -> Result<String, KeyError> {
    for (index, segment) in segments.iter().enumerate() {
        validate_segment(index, segment)?;
    }
    Ok(segments.join(&KEY_SEPARATOR.to_string()))
}

fn validate_segment(index: usize, segment: &str) -> Result<(), KeyError> {
    if segment.is_empty() {
        return Err(KeyError::EmptySegment { index });
    }
    if segment.contains(KEY_SEPARATOR) {
        return Err(KeyError::ReservedSeparator {
            segment: segment.to_string(),
            separator: KEY_SEPARATOR,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_getters() {
        let key = CacheKey::new("dns", "records", "Example.COM").expect("valid key");
        assert_eq!(key.namespace(), "dns");
        assert_eq!(key.category(), "records");
        assert_eq!(key.subject(), "example.com");
        assert_eq!(key.encode(), "dns:records:example.com");
    }

    #[test]
    fn test_for_category() {
        let key = CacheKey::for_category(CacheCategory::Headers, "example.com").expect("valid key");
        assert_eq!(key.encode(), "http:headers:example.com");
    }

    #[test]
    fn test_rejects_separator_in_segment() {
        let err = CacheKey::new("dns", "records", "2001:db8::1").unwrap_err();
        assert!(matches!(err, KeyError::ReservedSeparator { .. }));
    }

    #[test]
    fn test_rejects_empty_segment() {
        assert_eq!(
            CacheKey::new("dns", "", "example.com").unwrap_err(),
            KeyError::EmptySegment { index: 1 }
        );
        assert_eq!(
            CacheKey::new("dns", "records", "   ").unwrap_err(),
            KeyError::EmptySegment { index: 2 }
        );
    }

    #[test]
    fn test_rejects_wildcard_subject() {
        assert!(CacheKey::new("dns", "records", "*").is_err());
    }

    #[test]
    fn test_scan_pattern() {
        assert_eq!(
            CacheKey::scan_pattern("dns", "records").expect("valid pattern"),
            "dns:records:*"
        );
        assert!(CacheKey::scan_pattern("dns:x", "records").is_err());
    }

    #[test]
    fn test_parse_subject_matches() {
        assert_eq!(
            CacheKey::parse_subject("dns:records:example.com", "dns", "records"),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn test_parse_subject_rejects_malformed() {
        assert_eq!(CacheKey::parse_subject("dns:records", "dns", "records"), None);
        assert_eq!(
            CacheKey::parse_subject("dns:records:a:b", "dns", "records"),
            None
        );
        assert_eq!(
            CacheKey::parse_subject("dns:headers:example.com", "dns", "records"),
            None
        );
        assert_eq!(CacheKey::parse_subject("dns:records:", "dns", "records"), None);
        assert_eq!(
            CacheKey::parse_subject("dns:records:EXAMPLE.com", "dns", "records"),
            None
        );
        assert_eq!(CacheKey::parse_subject("", "dns", "records"), None);
    }

    #[test]
    fn test_encode_segments() {
        assert_eq!(
            encode_segments(&["a", "b", "c", "d"]).expect("valid segments"),
            "a:b:c:d"
        );
        assert!(encode_segments(&["a", "b:c"]).is_err());
    }

    #[test]
    fn test_categories_have_distinct_prefixes() {
        let mut seen = std::collections::HashSet::new();
        for category in CacheCategory::ALL {
            assert!(seen.insert((category.namespace(), category.as_str())));
        }
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn segment_strategy() -> impl Strategy<Value = String> {
        "[a-z0-9.\\-]{1,24}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: distinct segment triples never encode to the same key.
        #[test]
        fn prop_encoding_is_injective(
            a in (segment_strategy(), segment_strategy(), segment_strategy()),
            b in (segment_strategy(), segment_strategy(), segment_strategy()),
        ) {
            let key_a = CacheKey::new(a.0.clone(), a.1.clone(), &a.2).expect("valid key");
            let key_b = CacheKey::new(b.0.clone(), b.1.clone(), &b.2).expect("valid key");
            if key_a == key_b {
                prop_assert_eq!(key_a.encode(), key_b.encode());
            } else {
                prop_assert_ne!(key_a.encode(), key_b.encode());
            }
        }

        /// Property: the subject of an encoded key is recoverable by a scan reader.
        #[test]
        fn prop_subject_extractable(
            namespace in segment_strategy(),
            category in segment_strategy(),
            subject in segment_strategy(),
        ) {
            let key = CacheKey::new(namespace.clone(), category.clone(), &subject).expect("valid key");
            let parsed = CacheKey::parse_subject(&key.encode(), &namespace, &category);
            prop_assert_eq!(parsed, Some(subject));
        }

        /// Property: decoding arbitrary text never panics.
        #[test]
        fn prop_decode_total(raw in ".{0,64}") {
            let _ = CacheKey::decode(&raw);
        }
    }
}
