//! Error types for the regwatch operator.

use regwatch_core::RegwatchError;
use thiserror::Error;

/// Errors that can occur during reconciliation.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// The image check failed before reaching an answer.
    #[error("Image check failed for {image}: {source}")]
    CheckFailed {
        /// Image reference being checked.
        image: String,
        /// Underlying failure.
        #[source]
        source: RegwatchError,
    },

    /// Invalid resource.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl OperatorError {
    /// Whether the failure may go away on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::KubeError(_) => true,
            Self::CheckFailed { source, .. } => source.is_retriable(),
            Self::InvalidConfig(_) | Self::SerializationError(_) => false,
        }
    }
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}
