//! Task runner seam and the engine-backed runner.

use std::sync::Arc;

use async_trait::async_trait;
use avgen_engine::{EngineError, WorkflowEngine};
use avgen_models::{JobId, ScheduledTask, WorkflowRequest, WorkflowStatus};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::TaskError;

/// Usage accumulated by one attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUsage {
    pub videos: u32,
    pub cost: f64,
    pub api_calls: u32,
    /// Jobs created so far, the one in progress last
    pub jobs: Vec<JobId>,
}

/// Executes one attempt of a scheduled task.
///
/// Usage is written into `usage` as it is incurred, so work done before a
/// failure or timeout is still accounted for.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &ScheduledTask, usage: &mut TaskUsage) -> Result<(), TaskError>;

    /// Called after `run` was dropped at the task timeout, with the usage it
    /// had recorded. Work left behind must be brought to an end here.
    async fn abandon(&self, _task: &ScheduledTask, _usage: &TaskUsage) {}

    /// Called once a finished task has been removed from the store.
    async fn release(&self, _task: &ScheduledTask) {}
}

/// Task config understood by [`WorkflowTaskRunner`].
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowTaskConfig {
    pub request: WorkflowRequest,
    #[serde(default = "default_videos")]
    pub videos: u32,
}

fn default_videos() -> u32 {
    1
}

impl WorkflowTaskConfig {
    pub fn parse(config: &Map<String, Value>) -> Result<Self, TaskError> {
        let parsed: Self = serde_json::from_value(Value::Object(config.clone()))
            .map_err(|e| TaskError::permanent(format!("invalid task config: {}", e)))?;
        if parsed.videos == 0 {
            return Err(TaskError::permanent("invalid task config: videos must be positive"));
        }
        Ok(parsed)
    }
}

/// Videos a task config asks for (1 when unspecified or unreadable).
pub fn planned_videos(config: &Map<String, Value>) -> u32 {
    config
        .get("videos")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .unwrap_or(1)
}

/// Runs a task by creating and executing workflow jobs through the
/// engine's public API, one per requested video.
pub struct WorkflowTaskRunner {
    engine: Arc<WorkflowEngine>,
    cost_per_api_call: f64,
}

impl WorkflowTaskRunner {
    pub fn new(engine: Arc<WorkflowEngine>, cost_per_api_call: f64) -> Self {
        Self {
            engine,
            cost_per_api_call,
        }
    }
}

fn engine_error(err: EngineError) -> TaskError {
    if err.is_client_error() {
        TaskError::permanent(err.to_string())
    } else {
        TaskError::retryable(err.to_string())
    }
}

#[async_trait]
impl TaskRunner for WorkflowTaskRunner {
    async fn run(&self, task: &ScheduledTask, usage: &mut TaskUsage) -> Result<(), TaskError> {
        let config = WorkflowTaskConfig::parse(&task.config)?;

        // Videos finished by earlier attempts are not produced again
        let remaining = config.videos.saturating_sub(task.metrics.videos_generated);

        for n in 0..remaining {
            let job = self
                .engine
                .initialize(config.request.clone(), &task.owner_id)
                .await
                .map_err(engine_error)?;
            usage.jobs.push(job.id.clone());
            let job = self.engine.execute(&job.id).await.map_err(engine_error)?;

            usage.api_calls += job.completed_stages;
            usage.cost += job.completed_stages as f64 * self.cost_per_api_call;

            match job.status {
                WorkflowStatus::Completed => {
                    usage.videos += 1;
                    info!(
                        task_id = %task.task_id,
                        job_id = %job.id,
                        "Task video {}/{} completed", n + 1, remaining
                    );
                }
                WorkflowStatus::Cancelled => {
                    return Err(TaskError::permanent(format!("job {} was cancelled", job.id)));
                }
                status => {
                    warn!(
                        task_id = %task.task_id,
                        job_id = %job.id,
                        status = %status,
                        "Task job did not complete"
                    );
                    return Err(TaskError::retryable(format!(
                        "job {} {}: {}",
                        job.id,
                        status,
                        job.error.as_deref().unwrap_or("no error recorded")
                    )));
                }
            }
        }

        Ok(())
    }

    async fn abandon(&self, task: &ScheduledTask, usage: &TaskUsage) {
        let Some(job_id) = usage.jobs.last() else {
            return;
        };
        match self.engine.fail(job_id, "task attempt timed out").await {
            Ok(_) => warn!(task_id = %task.task_id, job_id = %job_id, "Failed job of timed out attempt"),
            // Finished right at the deadline
            Err(EngineError::InvalidStateTransition(_)) => {
                debug!(task_id = %task.task_id, job_id = %job_id, "Timed out job already finished")
            }
            Err(e) => warn!(task_id = %task.task_id, job_id = %job_id, "Could not fail timed out job: {}", e),
        }
    }

    async fn release(&self, task: &ScheduledTask) {
        for job_id in &task.job_ids {
            if let Err(e) = self.engine.cleanup(job_id).await {
                warn!(task_id = %task.task_id, job_id = %job_id, "Failed to clean up task job: {}", e);
            }
        }
    }
}
