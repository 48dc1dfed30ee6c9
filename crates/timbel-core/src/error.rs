//! Error types for the pipeline monitor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Stage {stage} not found in pipeline {pipeline}")]
    StageNotFound { pipeline: String, stage: String },

    // Input errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // State machine errors
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Pipeline {id} is {status} and accepts no further changes")]
    PipelineTerminal { id: String, status: String },

    #[error("Pipeline {0} is paused")]
    PipelinePaused(String),

    #[error("Pipeline {id} cannot complete, unfinished stages: {stages:?}")]
    StagesIncomplete { id: String, stages: Vec<String> },

    #[error("Concurrent modification of pipeline {0}")]
    Conflict(String),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Unknown pipeline or stage.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::PipelineNotFound(_) | Error::StageNotFound { .. })
    }

    /// The request was well-formed but conflicts with the pipeline's current state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::InvalidTransition { .. }
                | Error::PipelineTerminal { .. }
                | Error::PipelinePaused(_)
                | Error::StagesIncomplete { .. }
                | Error::Conflict(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::PipelineNotFound("pip_1".into()).is_not_found());
        assert!(
            Error::StageNotFound {
                pipeline: "pip_1".into(),
                stage: "build".into()
            }
            .is_not_found()
        );
        assert!(Error::PipelinePaused("pip_1".into()).is_conflict());
        assert!(!Error::Validation("missing branch".into()).is_conflict());
        assert!(!Error::Internal("boom".into()).is_not_found());
    }
}
