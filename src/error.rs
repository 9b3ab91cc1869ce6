//! Error types for proof-loop.

use thiserror::Error;

use crate::stage::StageKind;

/// Result type alias using proof-loop's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a proof session.
///
/// A checker rejecting a candidate, timing out, or failing to launch is *not*
/// an error; those are reported through [`crate::lean::CheckOutcome`] and
/// drive the critique path instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid setup, detected before any stage runs.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stage call could not complete.
    #[error("{stage} stage failed: {message}")]
    StageInvocation {
        stage: StageKind,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// LLM API error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// LLM error (simple variant)
    #[error("LLM error: {0}")]
    LLM(String),

    /// Filesystem error outside the checker subprocess
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap an error raised by a stage implementation.
    ///
    /// Errors that already carry a stage are passed through unchanged so the
    /// innermost stage wins.
    pub fn stage(stage: StageKind, err: Error) -> Self {
        match err {
            Self::StageInvocation { .. } => err,
            other => Self::StageInvocation {
                stage,
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Create a stage invocation error without an underlying source.
    pub fn stage_message(stage: StageKind, message: impl Into<String>) -> Self {
        Self::StageInvocation {
            stage,
            message: message.into(),
            source: None,
        }
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from a stage call rather than setup.
    pub fn is_stage_failure(&self) -> bool {
        matches!(self, Self::StageInvocation { .. })
    }

    /// The stage that failed, if any.
    pub fn failed_stage(&self) -> Option<StageKind> {
        match self {
            Self::StageInvocation { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wraps_llm_error() {
        let err = Error::stage(StageKind::Prove, Error::LLM("connection reset".to_string()));

        assert!(err.is_stage_failure());
        assert_eq!(err.failed_stage(), Some(StageKind::Prove));
        assert!(err.to_string().contains("prove stage failed"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_stage_keeps_innermost_stage() {
        let inner = Error::stage_message(StageKind::Verify, "scratch directory missing");
        let err = Error::stage(StageKind::Critique, inner);

        assert_eq!(err.failed_stage(), Some(StageKind::Verify));
    }

    #[test]
    fn test_config_is_not_stage_failure() {
        let err = Error::config("workspace does not exist");
        assert!(!err.is_stage_failure());
        assert_eq!(err.failed_stage(), None);
        assert_eq!(
            err.to_string(),
            "Configuration error: workspace does not exist"
        );
    }
}
