//! Core error types for flowtrace-core.
//!
//! Step failures are deliberately *not* represented here: they travel as the
//! step's own `anyhow::Error` so the original value reaches the caller
//! untouched. This enum only covers configuration problems.

use thiserror::Error;

/// Errors produced while reading or parsing tracing configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A verbosity string was not one of `debug`, `info`, `error`.
    #[error("invalid verbosity level: '{value}' (expected debug, info or error)")]
    InvalidVerbosity { value: String },

    /// A configuration value could not be parsed.
    #[error("invalid value for {key}: '{value}'")]
    InvalidSetting { key: String, value: String },
}
