//! Error kinds for the generation core.
//!
//! Callers branch on these kinds rather than on message text: a
//! [`GenerationError::Stopped`] is a normal termination path, a
//! [`GenerationError::Parse`] suggests retrying, and a
//! [`GenerationError::Transport`] suggests checking connectivity.

use thiserror::Error;

/// Errors raised by the outline and section generators.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The backend or network call failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The model response could not be turned into an outline.
    #[error("parse error: {0}")]
    Parse(String),

    /// Cooperative cancellation was observed.
    #[error("stopped by user")]
    Stopped,

    /// The request was rejected before any call was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl GenerationError {
    pub fn is_stopped(&self) -> bool {
        matches!(self, GenerationError::Stopped)
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, GenerationError::Parse(_))
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Transport(e.to_string())
    }
}

/// Outcome of an orchestrator run that did not complete.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The stop token was observed; completed sections are kept.
    #[error("stopped by user")]
    Stopped,

    /// Any other failure; completed sections are kept.
    #[error("generation failed: {0}")]
    Failed(#[source] GenerationError),
}

impl From<GenerationError> for OrchestratorError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::Stopped => OrchestratorError::Stopped,
            other => OrchestratorError::Failed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_maps_to_stopped_outcome() {
        let e: OrchestratorError = GenerationError::Stopped.into();
        assert!(matches!(e, OrchestratorError::Stopped));
    }

    #[test]
    fn test_other_errors_map_to_failed() {
        let e: OrchestratorError = GenerationError::Parse("bad".into()).into();
        match e {
            OrchestratorError::Failed(inner) => assert!(inner.is_parse()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
