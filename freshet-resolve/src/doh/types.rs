//! DNS JSON envelope parsing
//!
//! `{ "Status": int, "Answer"?: [{ "name", "type", "TTL", "data" }] }`

use freshet_core::{RecordType, ResolveError, UpstreamRecord};
use serde::Deserialize;
use serde_json::Value;

use crate::provider::QueryAnswer;

/// RCODE for a successful query.
pub const STATUS_NOERROR: i64 = 0;

/// RCODE for "no such name".
pub const STATUS_NXDOMAIN: i64 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct DohAnswer {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: u16,
    #[serde(rename = "TTL", default)]
    pub ttl: Option<u32>,
    pub data: String,
}

fn malformed(provider: &str, reason: impl Into<String>) -> ResolveError {
    ResolveError::MalformedEnvelope {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

/// Parse a response body into the answers for `requested`.
///
/// Answers of other types (e.g. the CNAME chain in front of an A record)
/// are dropped. A non-object body or a non-list `Answer` is malformed.
pub fn parse_envelope(
    provider: &str,
    requested: RecordType,
    body: &Value,
) -> Result<QueryAnswer, ResolveError> {
    let envelope = body
        .as_object()
        .ok_or_else(|| malformed(provider, "envelope is not an object"))?;
    let status = envelope
        .get("Status")
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed(provider, "missing or non-integer Status"))?;

    let answers = match envelope.get("Answer") {
        None | Some(Value::Null) => {
            return Ok(if status == STATUS_NXDOMAIN {
                QueryAnswer::nxdomain()
            } else {
                QueryAnswer::empty()
            });
        }
        Some(Value::Array(answers)) => answers,
        Some(_) => return Err(malformed(provider, "Answer is not a list")),
    };

    let mut records = Vec::with_capacity(answers.len());
    for raw in answers {
        let answer: DohAnswer = match serde_json::from_value(raw.clone()) {
            Ok(answer) => answer,
            Err(e) => {
                tracing::debug!(provider = %provider, error = %e, "Skipping unreadable answer");
                continue;
            }
        };
        if answer.record_type != requested.code() {
            continue;
        }
        if let Some(record) = to_record(requested, answer) {
            records.push(record);
        }
    }

    Ok(QueryAnswer {
        records,
        nxdomain: status == STATUS_NXDOMAIN,
    })
}

fn to_record(record_type: RecordType, answer: DohAnswer) -> Option<UpstreamRecord> {
    let name = answer.name.trim().trim_end_matches('.').to_string();
    let mut record = match record_type {
        RecordType::MX => {
            let (priority, host) = parse_mx(&answer.data)?;
            UpstreamRecord::new(record_type, name, host).with_priority(priority)
        }
        RecordType::TXT => UpstreamRecord::new(record_type, name, unquote_txt(&answer.data)),
        RecordType::CNAME | RecordType::NS => {
            UpstreamRecord::new(record_type, name, answer.data.trim().trim_end_matches('.'))
        }
        RecordType::A | RecordType::AAAA => UpstreamRecord::new(record_type, name, answer.data.trim()),
    };
    record.ttl = answer.ttl;
    Some(record)
}

/// `"10 mail.example.com."` → `(10, "mail.example.com")`
pub fn parse_mx(data: &str) -> Option<(u16, String)> {
    let mut parts = data.split_whitespace();
    let priority = parts.next()?.parse().ok()?;
    let host = parts.next()?.trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    Some((priority, host.to_string()))
}

/// Join the quoted character-strings of a TXT payload.
///
/// `"v=spf1 " "-all"` → `v=spf1 -all`. Unquoted data is returned trimmed.
pub fn unquote_txt(data: &str) -> String {
    let data = data.trim();
    if !data.starts_with('"') {
        return data.to_string();
    }

    let mut joined = String::with_capacity(data.len());
    let mut in_quotes = false;
    let mut chars = data.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    joined.push(escaped);
                }
            }
            _ if in_quotes => joined.push(c),
            _ => {}
        }
    }
    joined
}
