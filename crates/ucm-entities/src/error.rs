//! Error types for ucm-entities

use thiserror::Error;

/// Errors raised while naming entities or talking to the UCM backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UcmError {
    /// The fully-qualified name matched none of the known name patterns
    #[error("The entity type of {fqname} was not recognized")]
    NotRecognized { fqname: String },

    /// A backend query or mutation failed.
    ///
    /// `output` carries the raw diagnostic text the backend produced, when
    /// there was any, so callers can hand it to the job console verbatim.
    #[error("{operation} failed: {message}")]
    Command {
        operation: String,
        message: String,
        output: Option<String>,
    },

    /// The backend does not know the entity
    #[error("{kind} not found: {fqname}")]
    NotFound { kind: String, fqname: String },

    /// The operation does not apply to the given entity
    #[error("Invalid operation {operation} on {fqname}: {reason}")]
    InvalidOperation {
        operation: String,
        fqname: String,
        reason: String,
    },

    /// Fixture or payload (de)serialization failed
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl UcmError {
    /// Build a `Command` error for the named backend operation.
    pub fn command(
        operation: impl Into<String>,
        message: impl Into<String>,
        output: Option<String>,
    ) -> Self {
        UcmError::Command {
            operation: operation.into(),
            message: message.into(),
            output,
        }
    }

    /// Raw backend output attached to this error, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            UcmError::Command { output, .. } => output.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for UcmError {
    fn from(err: serde_json::Error) -> Self {
        UcmError::Serialization(err.to_string())
    }
}
