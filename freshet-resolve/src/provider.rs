//! Upstream DNS provider capability.

use async_trait::async_trait;
use freshet_core::{RecordType, ResolveError, UpstreamRecord};

/// Answer to a single `(subject, type)` query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryAnswer {
    pub records: Vec<UpstreamRecord>,
    /// The provider reported that the name does not exist.
    pub nxdomain: bool,
}

impl QueryAnswer {
    pub fn records(records: Vec<UpstreamRecord>) -> Self {
        Self {
            records,
            nxdomain: false,
        }
    }

    pub fn nxdomain() -> Self {
        Self {
            records: Vec::new(),
            nxdomain: true,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Something that can answer DNS queries.
///
/// A malformed or unreachable upstream is an `Err`; "no such name" and
/// "no data" are successful, empty answers.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Stable identifier reported as `resolver_used`.
    fn id(&self) -> &str;

    async fn query(&self, subject: &str, record_type: RecordType) -> Result<QueryAnswer, ResolveError>;
}
