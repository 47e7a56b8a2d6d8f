//! Error taxonomy shared by resolution and execution.
//!
//! Plumbing inside [`crate::io`] reports failures as `anyhow::Error` with
//! context; the orchestration layers lift those into [`PrepareError::Io`] and
//! reserve the other variants for failures a pipeline author can act on.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed `[org/]name[@version]` action reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("action reference '{0}' cannot contain more than one '/'")]
    TooManySlashes(String),
    #[error("action reference '{0}' cannot contain more than one '@'")]
    TooManyAts(String),
    #[error("action reference '{0}' has an empty {1}")]
    EmptySegment(String, &'static str),
}

/// Fatal error raised while resolving or running a pipeline.
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Structural mismatch, bad default, missing entry point or cycle.
    #[error("{message}")]
    Validation { message: String },

    /// Environment provisioning failed; details live in the persisted log.
    #[error(
        "unable to install dependencies for '{action}', see {} for details",
        log_path.display()
    )]
    Dependency { action: String, log_path: PathBuf },

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl PrepareError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Malformed structured-output command emitted by an action.
///
/// Fatal to the emitting invocation only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("missing required params for '{command}': expected {expected}, found {found}")]
    MissingParams {
        command: String,
        expected: usize,
        found: usize,
    },
    #[error("'{command}' expects valid JSON params: {reason}")]
    InvalidJson { command: String, reason: String },
    #[error("'{command}' expects a dictionary of key, value pairs")]
    NotAnObject { command: String },
    #[error("'{command}' received outside of a running action")]
    NoCurrentAction { command: String },
}
