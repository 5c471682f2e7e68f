//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence; otherwise `logging.level` is used as the filter.
//! `logging.format` selects human-readable text or one JSON object per line.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Telemetry-specific error type
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Build the filter from `RUST_LOG`, falling back to the configured level
pub fn env_filter(config: &LoggingConfig) -> TelemetryResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::InvalidFilter {
        filter: config.level.clone(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing(config: &LoggingConfig) -> TelemetryResult<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    result.map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(format = ?config.format, "Tracing initialized");
    Ok(())
}
