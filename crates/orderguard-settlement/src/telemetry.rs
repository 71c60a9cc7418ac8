//! Subscriber setup for embedding binaries and tests.
//!
//! Targets worth filtering on:
//!
//! | Target | Description |
//! |--------|-------------|
//! | `orderguard_settlement::ledger` | Escrow transitions and sweeps |
//! | `orderguard_settlement::publisher` | Event delivery and retries |
//! | `orderguard_settlement::orchestrator` | Request flow, acknowledgement gate |
//! | `orderguard_assess::scorer` | Scores and audited overrides (`audit = true`) |
//!
//! ```bash
//! RUST_LOG=info,orderguard_settlement::ledger=debug my-service
//! ```

use orderguard_types::{OrderguardError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_target: true,
        }
    }
}

impl LogConfig {
    #[must_use]
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Self::default()
        }
    }

    fn filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level).map_err(|e| {
                OrderguardError::Configuration(format!("invalid log level '{}': {e}", self.level))
            }),
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
/// [`OrderguardError::Configuration`] if the level directive does not parse
/// or a global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = config.filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let installed = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    installed.map_err(|e| OrderguardError::Configuration(format!("log subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parses_from_json() {
        let config: LogConfig = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
        assert!(config.with_target);
    }

    #[test]
    fn bad_level_rejected() {
        let config = LogConfig {
            level: "orderguard=loud".to_string(),
            ..LogConfig::default()
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(config.filter().is_err());
        }
    }
}
