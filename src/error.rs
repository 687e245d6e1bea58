//! Error taxonomy for the planning pipeline.

use thiserror::Error;

use crate::reasoning::ReasoningError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Reasoning Service unconfigured, unreachable, timed out or rate limited.
    #[error("reasoning service unavailable: {0}")]
    ReasoningUnavailable(String),

    /// The service answered but the payload did not fit the expected shape.
    #[error("malformed generation result: {0}")]
    MalformedGenerationResult(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("{entity} {id} is already completed")]
    DuplicateCompletion { entity: &'static str, id: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot move task from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Failures a deterministic fallback may paper over.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            PipelineError::ReasoningUnavailable(_) | PipelineError::MalformedGenerationResult(_)
        )
    }

    /// Whether the client should keep the user's intent and try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ReasoningUnavailable(_) | PipelineError::Persistence(_)
        )
    }

    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        PipelineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<ReasoningError> for PipelineError {
    fn from(e: ReasoningError) -> Self {
        PipelineError::ReasoningUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Validation(format!("stored JSON could not be decoded: {}", e))
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_eligibility() {
        assert!(PipelineError::ReasoningUnavailable("down".into()).is_fallback_eligible());
        assert!(PipelineError::MalformedGenerationResult("bad".into()).is_fallback_eligible());
        assert!(!PipelineError::Validation("title".into()).is_fallback_eligible());
    }

    #[test]
    fn test_reasoning_error_converts_to_unavailable() {
        let err: PipelineError = ReasoningError::Unconfigured.into();
        assert!(matches!(err, PipelineError::ReasoningUnavailable(_)));
        assert!(err.is_retryable());
    }
}
