//! Logging system setup and configuration.
//!
//! This module handles the initialization of the tracing-based logging
//! system used throughout the server for diagnostic output.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system.
///
/// Sets up structured logging using the tracing crate with configurable
/// output format and filtering levels. The `RUST_LOG` environment variable
/// overrides the configured level when set.
///
/// # Arguments
/// * `level` - Base log level filter (trace, debug, info, warn, error)
/// * `json_format` - Whether to emit JSON-formatted logs
///
/// # Returns
/// * `Result<()>` - Success or error during logging setup
pub fn setup_logging(level: &str, json_format: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }

    info!("🔧 Logging initialized with level: {}", level);
    Ok(())
}
