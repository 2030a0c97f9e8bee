//! Process-wide `tracing` subscriber setup.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "RANKFLOW_LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Reads [`LOG_FORMAT_ENV`], falling back to `Pretty`.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown log format '{other}'"),
        }
    }
}

/// Installs the global subscriber: `RUST_LOG` filtering (default
/// [`DEFAULT_FILTER`]) and `format` output.
///
/// Safe to call more than once. Returns `Ok(false)` if a subscriber was
/// already installed, by this function or by someone else.
pub fn init_logging(format: LogFormat) -> anyhow::Result<bool> {
    if LOGGER_INITIALIZED.get().is_some() {
        return Ok(false);
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("building log filter")?;

    let layer = match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .json()
            .with_filter(filter)
            .boxed(),
    };

    let installed = tracing_subscriber::registry().with(layer).try_init().is_ok();
    let _ = LOGGER_INITIALIZED.set(installed);
    if installed {
        tracing::info!(format = ?format, "Logging initialized");
    } else {
        tracing::debug!("Global tracing subscriber already set; keeping it");
    }
    Ok(installed)
}
