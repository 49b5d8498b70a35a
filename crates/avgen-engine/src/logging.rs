//! Structured job logging.
//!
//! Every line carries `job_id` and `operation` fields so a job's history
//! can be filtered out of JSON output.

use std::fmt::Display;

use avgen_models::{JobId, WorkflowStatus};
use tracing::{error, info, warn, Span};

/// Logger bound to one job and one engine operation.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    operation: &'static str,
}

impl JobLogger {
    /// `operation` names the engine call, e.g. "execute" or "cancel".
    pub fn new(job_id: &JobId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.clone(),
            operation,
        }
    }

    pub fn log_start(&self, message: impl Display) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_stage(&self, stage: &str, index: u32, total: u32) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            stage = %stage,
            "Job stage {}/{}: {}", index, total, stage
        );
    }

    pub fn log_progress(&self, message: impl Display) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: impl Display) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: impl Display) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job error: {}", message
        );
    }

    /// A job moved to a terminal state outside the pipeline.
    pub fn log_terminal(&self, status: WorkflowStatus, reason: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            status = %status,
            "Job {}: {}", status, reason
        );
    }

    pub fn log_completion(&self, message: impl Display) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job completed: {}", message
        );
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = self.operation
        )
    }
}
