//! # roomcast-telemetry
//!
//! One-call tracing setup: an [`EnvFilter`] built from the configured level
//! (`RUST_LOG` wins when set) feeding either a JSON or a human-readable
//! formatting layer on stdout.

#![deny(unsafe_code)]

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Telemetry configuration.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default filter directive, e.g. `info` or `warn,roomcast_hub=debug`.
    pub level: String,
    /// Per-module overrides appended to `level`.
    pub module_levels: Vec<(String, String)>,
    /// JSON lines instead of pretty output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// The filter directive this config describes, ignoring `RUST_LOG`.
    pub fn directive(&self) -> String {
        let mut directive = self.level.trim().to_lowercase();
        if directive.is_empty() {
            directive.push_str("info");
        }
        for (module, level) in &self.module_levels {
            directive.push_str(&format!(",{module}={}", level.to_lowercase()));
        }
        directive
    }
}

/// Telemetry setup failure.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log filter '{directive}': {reason}")]
    InvalidFilter {
        /// The rejected directive.
        directive: String,
        /// Parser message.
        reason: String,
    },
    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed")]
    AlreadyInitialized,
}

/// Handle returned by [`init_telemetry`]. Keeps the effective filter for
/// reporting.
#[derive(Debug)]
pub struct TelemetryGuard {
    filter: String,
    json: bool,
}

impl TelemetryGuard {
    /// The filter in effect.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Whether output is JSON.
    pub fn is_json(&self) -> bool {
        self.json
    }
}

/// Build the filter: `RUST_LOG` if set and valid, otherwise the config.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = config.directive();
    EnvFilter::try_new(&directive).map_err(|e| TelemetryError::InvalidFilter {
        directive,
        reason: e.to_string(),
    })
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = build_filter(config)?;
    let effective = filter.to_string();

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)?;

    Ok(TelemetryGuard {
        filter: effective,
        json: config.json,
    })
}
