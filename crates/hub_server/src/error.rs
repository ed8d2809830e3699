//! Error types for the hub server.
//!
//! This module defines the structured error taxonomy used across the
//! coordinator and its owned subsystems. Failures propagate to the
//! immediate caller; nothing here is treated as process-fatal.

use thiserror::Error;

/// Errors surfaced by the server coordinator and its subsystems.
///
/// Construction and resolution failures leave the corresponding lazy
/// field absent so the next accessor call retries from scratch.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration supplied to a subsystem constructor.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The pub/sub adapter could not be built or a transport operation failed.
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// A configured channel name could not be resolved to a channel class.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Connection, binding, or protocol failures.
    #[error("Network error: {0}")]
    Network(String),

    /// Work was submitted to a worker pool that has already been halted.
    #[error("Worker pool is halted")]
    PoolHalted,

    /// Internal failures that don't fit other categories.
    #[error("Internal error: {0}")]
    Internal(String),
}
