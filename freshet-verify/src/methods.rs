//! Ownership verification methods
//!
//! Tried in order: DNS TXT, HTTP file, HTML meta tag. The first method that
//! proves ownership wins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use freshet_core::constants::{
    VERIFICATION_LEGACY_FILE_PATH, VERIFICATION_META_NAME, VERIFICATION_PREFIX,
    VERIFICATION_TXT_LABEL,
};
use freshet_core::{FreshetResult, RecordType, ResolverConfig, UpstreamRecord, VerificationError};
use freshet_resolve::Resolver;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

static META_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("static regex"));

static META_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\b(name|content)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#)
        .expect("static regex")
});

/// How ownership was proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    DnsTxt,
    HttpFile,
    MetaTag,
}

impl VerificationMethod {
    pub const ORDER: [VerificationMethod; 3] = [
        VerificationMethod::DnsTxt,
        VerificationMethod::HttpFile,
        VerificationMethod::MetaTag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMethod::DnsTxt => "dns_txt",
            VerificationMethod::HttpFile => "http_file",
            VerificationMethod::MetaTag => "meta_tag",
        }
    }
}

impl std::fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `freshet-verification=<token>`
pub fn expected_value(token: &str) -> String {
    format!("{}{}", VERIFICATION_PREFIX, token.trim())
}

/// Whether any TXT record carries the expected value.
pub fn txt_matches(records: &[UpstreamRecord], token: &str) -> bool {
    let expected = expected_value(token);
    records
        .iter()
        .filter(|r| r.record_type == RecordType::TXT)
        .any(|r| r.value.trim() == expected)
}

/// Whether a served verification file proves ownership.
pub fn file_body_matches(body: &str, token: &str) -> bool {
    body.trim() == expected_value(token)
}

/// Whether any ownership meta tag on the page carries `token`.
///
/// Every matching tag is checked so several owners can verify the same
/// page. Attribute order and quoting style do not matter.
pub fn meta_tags_contain(html: &str, token: &str) -> bool {
    let token = token.trim();
    if token.is_empty() {
        return false;
    }
    META_TAG.find_iter(html).any(|tag| {
        let mut name = None;
        let mut content = None;
        for attr in META_ATTR.captures_iter(tag.as_str()) {
            let value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .or_else(|| attr.get(4))
                .map(|m| m.as_str().trim());
            match attr.get(1).map(|m| m.as_str().to_ascii_lowercase()) {
                Some(ref key) if key == "name" => name = value,
                Some(ref key) if key == "content" => content = value,
                _ => {}
            }
        }
        matches!(name, Some(n) if n.eq_ignore_ascii_case(VERIFICATION_META_NAME))
            && content == Some(token)
    })
}

/// Per-token file path, checked before the legacy fixed path.
pub fn token_file_path(token: &str) -> String {
    format!("/.well-known/freshet-verification-{}.txt", token.trim())
}

/// One way of proving ownership of a domain.
#[async_trait]
pub trait MethodProbe: Send + Sync {
    fn method(&self) -> VerificationMethod;

    /// `Ok(false)` means "checked, not proven". `Err` means the check
    /// itself could not run.
    async fn check(&self, domain: &str, token: &str) -> Result<bool, VerificationError>;
}

fn probe_failed(method: VerificationMethod, domain: &str, reason: impl std::fmt::Display) -> VerificationError {
    VerificationError::ProbeFailed {
        method: method.to_string(),
        domain: domain.to_string(),
        reason: reason.to_string(),
    }
}

/// TXT record at the apex or the `_freshet-verification` label.
pub struct DnsTxtProbe {
    resolver: Arc<Resolver>,
}

impl DnsTxtProbe {
    /// `resolver` should bypass intermediary caches.
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl MethodProbe for DnsTxtProbe {
    fn method(&self) -> VerificationMethod {
        VerificationMethod::DnsTxt
    }

    async fn check(&self, domain: &str, token: &str) -> Result<bool, VerificationError> {
        let names = [
            domain.to_string(),
            format!("{}.{}", VERIFICATION_TXT_LABEL, domain),
        ];
        let mut failures = 0;
        let mut last_error = None;
        for name in &names {
            match self.resolver.resolve(name, &[RecordType::TXT]).await {
                Ok(resolution) if txt_matches(&resolution.records, token) => return Ok(true),
                Ok(_) => {}
                Err(e) => {
                    debug!(name = %name, error = %e, "TXT lookup failed");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if failures == names.len() => Err(probe_failed(self.method(), domain, e)),
            _ => Ok(false),
        }
    }
}

/// File served at the per-token or legacy path.
pub struct HttpFileProbe {
    client: Client,
    scheme: String,
}

impl HttpFileProbe {
    pub fn new(timeout: Duration) -> Result<Self, VerificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| probe_failed(VerificationMethod::HttpFile, "-", e))?;
        Ok(Self {
            client,
            scheme: "https".to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Option<String>, reqwest::Error> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        response.text().await.map(Some)
    }
}

#[async_trait]
impl MethodProbe for HttpFileProbe {
    fn method(&self) -> VerificationMethod {
        VerificationMethod::HttpFile
    }

    async fn check(&self, domain: &str, token: &str) -> Result<bool, VerificationError> {
        let paths = [token_file_path(token), VERIFICATION_LEGACY_FILE_PATH.to_string()];
        let mut failures = 0;
        let mut last_error = None;
        for path in &paths {
            let url = format!("{}://{}{}", self.scheme, domain, path);
            match self.fetch(&url).await {
                Ok(Some(body)) if file_body_matches(&body, token) => return Ok(true),
                Ok(_) => {}
                Err(e) => {
                    debug!(url = %url, error = %e, "Verification file fetch failed");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if failures == paths.len() => Err(probe_failed(self.method(), domain, e)),
            _ => Ok(false),
        }
    }
}

/// `<meta name="freshet-site-verify" content="TOKEN">` on the root page.
pub struct MetaTagProbe {
    client: Client,
    scheme: String,
}

impl MetaTagProbe {
    pub fn new(timeout: Duration) -> Result<Self, VerificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| probe_failed(VerificationMethod::MetaTag, "-", e))?;
        Ok(Self {
            client,
            scheme: "https".to_string(),
        })
    }
}

#[async_trait]
impl MethodProbe for MetaTagProbe {
    fn method(&self) -> VerificationMethod {
        VerificationMethod::MetaTag
    }

    async fn check(&self, domain: &str, token: &str) -> Result<bool, VerificationError> {
        let url = format!("{}://{}/", self.scheme, domain);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| probe_failed(self.method(), domain, e))?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let html = response
            .text()
            .await
            .map_err(|e| probe_failed(self.method(), domain, e))?;
        Ok(meta_tags_contain(&html, token))
    }
}

/// Runs probes in order until one proves ownership.
#[derive(Clone)]
pub struct Verifier {
    probes: Vec<Arc<dyn MethodProbe>>,
}

impl Verifier {
    pub fn new(probes: Vec<Arc<dyn MethodProbe>>) -> Self {
        Self { probes }
    }

    /// DNS TXT through a cache-busting resolver for `config`, then the HTTP
    /// file, then the meta tag.
    pub fn standard(config: &ResolverConfig, timeout: Duration) -> FreshetResult<Self> {
        let resolver = Resolver::uncached(config)?;
        Ok(Self::with_resolver(Arc::new(resolver), timeout)?)
    }

    /// [`Verifier::standard`] with a caller-supplied resolver, which should
    /// bypass intermediary caches.
    pub fn with_resolver(resolver: Arc<Resolver>, timeout: Duration) -> Result<Self, VerificationError> {
        Ok(Self::new(vec![
            Arc::new(DnsTxtProbe::new(resolver)),
            Arc::new(HttpFileProbe::new(timeout)?),
            Arc::new(MetaTagProbe::new(timeout)?),
        ]))
    }

    /// The method that proved ownership, if any.
    ///
    /// A probe that cannot run counts as "not proven" for this attempt.
    pub async fn check(&self, domain: &str, token: &str) -> Option<VerificationMethod> {
        for probe in &self.probes {
            match probe.check(domain, token).await {
                Ok(true) => return Some(probe.method()),
                Ok(false) => debug!(domain = %domain, method = %probe.method(), "Not verified"),
                Err(e) => warn!(domain = %domain, method = %probe.method(), error = %e, "Probe failed"),
            }
        }
        None
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let methods: Vec<VerificationMethod> = self.probes.iter().map(|p| p.method()).collect();
        f.debug_struct("Verifier").field("methods", &methods).finish()
    }
}
