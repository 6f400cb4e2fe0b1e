//! Logging configuration using tracing.

use crate::utils::errors::{Result, SyncError};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where log lines go
#[derive(Debug, Clone, Copy)]
pub enum LogOutput<'a> {
    /// Console output (`--show`)
    Stdout,
    /// Append to a log file
    File(&'a Path),
}

/// Initialize logging with the specified level.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init(level: &str, output: LogOutput<'_>) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_level(level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);

    match output {
        LogOutput::Stdout => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogOutput::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
        }
    }
    .map_err(|e| SyncError::Config(format!("Failed to install logger: {}", e)))
}

/// Validate a configured log level and turn it into a filter
fn parse_level(level: &str) -> Result<EnvFilter> {
    let normalized = match level.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        known @ ("trace" | "debug" | "info" | "warn" | "error") => known.to_string(),
        _ => return Err(SyncError::Config(format!("Invalid log level: {}", level))),
    };

    EnvFilter::try_new(&normalized)
        .map_err(|e| SyncError::Config(format!("Invalid log level {}: {}", level, e)))
}
