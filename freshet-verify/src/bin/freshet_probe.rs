//! Freshet Probe
//!
//! Resolves a domain through the cached resolver and prints the snapshot
//! as JSON. With `--verify <token>` it also runs one verification pass.
//!
//! Usage:
//!   freshet-probe example.com [--types A,MX,TXT] [--verify TOKEN]
//!
//! Set `FRESHET_LMDB_PATH` to keep the fast tier on disk between runs.

use std::sync::Arc;

use chrono::Utc;
use freshet_core::{ConfigError, FreshetConfig, FreshetError, FreshetResult, RecordType};
use freshet_resolve::{CloudflareRangeSource, DnsCache, RangeCache, Resolver};
use freshet_storage::{FastTier, FreshnessScheduler, InMemoryFastTier, LmdbFastTier, TieredCache};
use freshet_verify::{init_tracing, LogFormat, Verifier};

const DEFAULT_LMDB_SIZE_MB: usize = 64;

struct Args {
    domain: String,
    types: Option<Vec<RecordType>>,
    verify_token: Option<String>,
}

fn usage(reason: impl Into<String>) -> FreshetError {
    ConfigError::Parse {
        reason: format!(
            "{}; usage: freshet-probe <domain> [--types A,MX] [--verify TOKEN]",
            reason.into()
        ),
    }
    .into()
}

fn parse_args() -> FreshetResult<Args> {
    let mut args = std::env::args().skip(1);
    let mut domain = None;
    let mut types = None;
    let mut verify_token = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--types" => {
                let raw = args.next().ok_or_else(|| usage("--types needs a value"))?;
                let parsed = raw
                    .split(',')
                    .map(|t| RecordType::parse(t).ok_or_else(|| usage(format!("unknown record type {t}"))))
                    .collect::<FreshetResult<Vec<_>>>()?;
                types = Some(parsed);
            }
            "--verify" => {
                verify_token = Some(args.next().ok_or_else(|| usage("--verify needs a token"))?);
            }
            other if other.starts_with("--") => return Err(usage(format!("unknown flag {other}"))),
            other => domain = Some(other.to_string()),
        }
    }

    Ok(Args {
        domain: domain.ok_or_else(|| usage("missing domain"))?,
        types,
        verify_token,
    })
}

fn fast_tier() -> FreshetResult<Arc<dyn FastTier>> {
    match std::env::var("FRESHET_LMDB_PATH") {
        Ok(path) => {
            std::fs::create_dir_all(&path).map_err(FreshetError::producer)?;
            Ok(Arc::new(LmdbFastTier::new(&path, DEFAULT_LMDB_SIZE_MB)?))
        }
        Err(_) => Ok(Arc::new(InMemoryFastTier::new())),
    }
}

#[tokio::main]
async fn main() -> FreshetResult<()> {
    init_tracing(LogFormat::from_env())?;

    let args = parse_args()?;
    let config = FreshetConfig::from_env();
    config.validate()?;

    let cache = TieredCache::new(fast_tier()?, config.cache.clone());
    let ranges = RangeCache::new(
        cache.clone(),
        Arc::new(CloudflareRangeSource::new(config.resolver.timeout)?),
        config.ttl.cdn_ranges,
    );
    let resolver = Arc::new(Resolver::from_config(&config.resolver)?.with_ranges(Arc::new(ranges)));

    let mut dns = DnsCache::new(cache.clone(), Arc::clone(&resolver), FreshnessScheduler::new(config.ttl.clone()));
    if let Some(types) = args.types {
        dns = dns.with_record_types(types);
    }

    let lookup = dns.lookup(&args.domain, Some(Utc::now())).await?;
    match lookup.value() {
        Some(snapshot) => {
            let json = serde_json::to_string_pretty(snapshot).map_err(FreshetError::producer)?;
            println!("{}", json);
        }
        None => tracing::warn!(domain = %args.domain, "No DNS data available"),
    }

    if let Some(token) = args.verify_token {
        let verifier = Verifier::standard(&config.resolver, config.verification.probe_timeout)?;

        match verifier.check(&args.domain, &token).await {
            Some(method) => tracing::info!(domain = %args.domain, method = %method, "Ownership verified"),
            None => tracing::info!(domain = %args.domain, "Ownership not verified"),
        }
    }

    tracing::info!(stats = ?cache.stats(), "Done");
    Ok(())
}
