//! Error types for the runtime crate.
//!
//! [`BackendError`] never leaves a `Tracer` method: the tracer logs it and
//! degrades to its documented fallback. [`GenerationError`] and
//! [`WorkflowError`] are ordinary step failures and propagate through the
//! pipeline unchanged.

use thiserror::Error;

/// Failures talking to the external trace backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend client could not be constructed at all.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The configured credential cannot be used.
    #[error("invalid backend credentials: {0}")]
    InvalidCredentials(String),

    /// Transport-level failure.
    #[error("backend request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Failures of the text generator behind the `generate` step.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider configuration is incomplete or unsupported.
    #[error("provider configuration: {0}")]
    Config(String),

    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider request failed ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("provider response parse failed: {0}")]
    Parse(String),

    /// The provider answered but produced no assistant content.
    #[error("provider response missing assistant content")]
    EmptyResponse,
}

/// Input problems detected by the workflow's own steps.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("missing state field '{0}'")]
    MissingField(&'static str),

    #[error("input text is empty")]
    EmptyInput,
}
