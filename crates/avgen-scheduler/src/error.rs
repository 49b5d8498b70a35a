//! Scheduler error types.

use avgen_models::TaskId;
use thiserror::Error;

use crate::scheduler::SchedulerState;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cannot {action} scheduler while {from}")]
    InvalidTransition {
        from: SchedulerState,
        action: &'static str,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task store error: {0}")]
    Store(String),
}

impl SchedulerError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

/// Failure of one task attempt, as reported by a runner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Transient; the scheduler may try again.
    #[error("{0}")]
    Retryable(String),

    /// Retrying cannot help (invalid config, cancelled work).
    #[error("{0}")]
    Permanent(String),
}

impl TaskError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable(_))
    }
}
