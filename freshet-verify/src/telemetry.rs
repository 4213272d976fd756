//! Tracing subscriber setup for freshet binaries.

use freshet_core::{ConfigError, FreshetResult};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "freshet=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `FRESHET_LOG_FORMAT=json` selects JSON; anything else is compact.
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("FRESHET_LOG_FORMAT").unwrap_or_default())
    }

    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(format: LogFormat) -> FreshetResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    result.map_err(|e| {
        ConfigError::Parse {
            reason: format!("Failed to init subscriber: {}", e),
        }
        .into()
    })
}
