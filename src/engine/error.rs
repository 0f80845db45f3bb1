//! Engine error taxonomy

use super::traits::StoreError;
use crate::lifecycle::LifecycleError;
use crate::llm::LlmError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Malformed request or an operation the graph state does not allow
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Generation failed: {0}")]
    UpstreamGeneration(String),
    #[error("Storage failure: {0}")]
    Persistence(String),
    /// Structured output that did not parse; recovered before reaching callers
    #[error("Unparseable model output: {0}")]
    Parse(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Conflict(msg) => Self::Validation(msg),
            StoreError::Backend(msg) => Self::Persistence(msg),
        }
    }
}

impl From<LlmError> for EngineError {
    fn from(err: LlmError) -> Self {
        Self::UpstreamGeneration(err.message)
    }
}

impl From<LifecycleError> for EngineError {
    fn from(err: LifecycleError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
