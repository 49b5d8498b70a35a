//! Engine error types.

use std::time::Duration;

use avgen_models::{InvalidTransition, JobId, ValidationError};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Caller-facing engine errors.
///
/// Stage failures never show up here: they are recorded on the job,
/// which `execute` returns as FAILED.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] InvalidTransition),

    #[error("Job {0} is already executing")]
    AlreadyExecuting(JobId),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Progress tracker error: {0}")]
    Tracker(#[from] TrackerError),
}

impl EngineError {
    pub fn not_found(id: &JobId) -> Self {
        Self::NotFound(id.clone())
    }

    /// Errors the caller caused (bad input, wrong id, wrong state).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::NotFound(_)
                | EngineError::InvalidStateTransition(_)
                | EngineError::AlreadyExecuting(_)
        )
    }
}

/// Storage backend failure.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl RepositoryError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Progress tracker failure.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("No progress recorded for job {0}")]
    NotFound(JobId),

    #[error("Store error: {0}")]
    Store(#[from] RepositoryError),
}

/// A pipeline stage failed. Absorbed into job state by the executor.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("stage '{stage}' failed: {message}")]
    Failed { stage: String, message: String },

    #[error("stage '{stage}' timed out after {timeout:?}")]
    Timeout { stage: String, timeout: Duration },

    #[error("no worker registered for stage '{0}'")]
    MissingWorker(String),
}

impl StageError {
    pub fn failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Failed { .. } => "failed",
            StageError::Timeout { .. } => "timeout",
            StageError::MissingWorker(_) => "missing_worker",
        }
    }
}
