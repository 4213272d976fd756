//! [`DnsProvider`] backed by a DoH JSON endpoint

use async_trait::async_trait;
use freshet_core::{ProviderKind, RecordType, ResolveError};
use std::time::Duration;

use super::client::DohClient;
use super::types::parse_envelope;
use crate::provider::{DnsProvider, QueryAnswer};

/// A DoH resolver answering one record type per request.
#[derive(Debug)]
pub struct DohProvider {
    client: DohClient,
}

impl DohProvider {
    pub fn new(client: DohClient) -> Self {
        Self { client }
    }

    pub fn for_kind(kind: ProviderKind, timeout: Duration, max_concurrency: usize) -> Result<Self, ResolveError> {
        Ok(Self::new(DohClient::for_kind(kind, timeout, max_concurrency)?))
    }

    pub fn client(&self) -> &DohClient {
        &self.client
    }
}

#[async_trait]
impl DnsProvider for DohProvider {
    fn id(&self) -> &str {
        self.client.id()
    }

    async fn query(&self, subject: &str, record_type: RecordType) -> Result<QueryAnswer, ResolveError> {
        let body = self.client.query(subject, record_type).await?;
        parse_envelope(self.client.id(), record_type, &body)
    }
}
