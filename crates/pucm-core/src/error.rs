//! Error taxonomy for the coordination engine.

use ucm_entities::UcmError;

/// Errors raised by selection, delivery, promotion and configuration.
#[derive(Debug, thiserror::Error)]
pub enum PucmError {
    #[error("The entity type of {fqname} was not recognized")]
    NotRecognized { fqname: String },

    #[error("No valid baselines found on {stream} for {component} at {level} or above")]
    NoBaselines {
        stream: String,
        component: String,
        level: String,
    },

    /// A backend query or mutation failed; `output` is the raw backend text.
    #[error("{message}")]
    BackendOperationFailed {
        message: String,
        output: Option<String>,
    },

    #[error("Could not deliver {baseline}, the change set was empty")]
    EmptyDeliver { baseline: String },

    #[error("Unhandled build outcome {outcome}, promotion level left unchanged")]
    UnhandledBuildOutcome { outcome: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PucmError {
    pub fn backend(message: impl Into<String>, output: Option<String>) -> Self {
        PucmError::BackendOperationFailed {
            message: message.into(),
            output,
        }
    }

    /// Raw backend diagnostic text, if the failure carried any.
    pub fn output(&self) -> Option<&str> {
        match self {
            PucmError::BackendOperationFailed { output, .. } => output.as_deref(),
            _ => None,
        }
    }

    pub fn is_no_baselines(&self) -> bool {
        matches!(self, PucmError::NoBaselines { .. })
    }
}

impl From<UcmError> for PucmError {
    fn from(err: UcmError) -> Self {
        match err {
            UcmError::NotRecognized { fqname } => PucmError::NotRecognized { fqname },
            other => PucmError::BackendOperationFailed {
                message: other.to_string(),
                output: other.output().map(str::to_string),
            },
        }
    }
}

/// Result type for pucm-core operations.
pub type Result<T> = std::result::Result<T, PucmError>;
