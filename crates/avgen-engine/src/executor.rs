//! Pipeline executor.
//!
//! Runs a job's stages in order. Each stage boundary is a short critical
//! section under the per-job lock (reload, check, mutate, persist); the
//! stage worker itself runs with the lock released so `cancel` can get in.
//! A cancel observed after a stage returns discards that stage's output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use avgen_models::{Job, JobId, WorkflowStage};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult, StageError};
use crate::locks::JobLocks;
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::ProgressTracker;
use crate::repository::WorkflowRepository;
use crate::stage::{StageAssets, StageInput, StageRegistry};

/// What happened at a stage boundary.
enum Boundary<T> {
    /// Keep going with the value.
    Continue(T),
    /// Job reached a terminal state (cancelled elsewhere); stop here.
    Stop(Job),
}

/// Drives a planned job through its stages.
pub struct PipelineExecutor {
    repository: Arc<dyn WorkflowRepository>,
    tracker: Arc<dyn ProgressTracker>,
    registry: StageRegistry,
    locks: Arc<JobLocks>,
    stage_timeout: Duration,
}

impl PipelineExecutor {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        tracker: Arc<dyn ProgressTracker>,
        registry: StageRegistry,
        locks: Arc<JobLocks>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            tracker,
            registry,
            locks,
            stage_timeout,
        }
    }

    /// Run `stages` for an IN_PROGRESS job and return the final job.
    ///
    /// Stage failures are recorded on the job (FAILED) rather than returned
    /// as errors. Errors are reserved for store failures and for a job that
    /// disappeared mid-run.
    pub async fn run(&self, job_id: &JobId, stages: &[String]) -> EngineResult<Job> {
        let logger = JobLogger::new(job_id, "pipeline");
        let total = stages.len() as u32;

        for (position, name) in stages.iter().enumerate() {
            let index = position as u32 + 1;
            let stage = WorkflowStage::step(index, name.clone());

            let input = match self.enter_stage(job_id, &stage, index, total).await? {
                Boundary::Continue(input) => input,
                Boundary::Stop(job) => {
                    logger.log_progress(&format!(
                        "stopping before {}: job is {}",
                        stage, job.status
                    ));
                    return Ok(job);
                }
            };

            logger.log_stage(name, index, total);
            let started = Instant::now();
            let outcome = self.invoke(name, input).await;
            metrics::record_stage_duration(name, outcome.is_ok(), started.elapsed().as_secs_f64());

            match self.finish_stage(job_id, &stage, index, total, outcome, &logger).await? {
                Boundary::Continue(()) => {}
                Boundary::Stop(job) => return Ok(job),
            }
        }

        self.finalize(job_id, &logger).await
    }

    /// Lock, reload, mark the stage and build the worker input.
    async fn enter_stage(
        &self,
        job_id: &JobId,
        stage: &WorkflowStage,
        index: u32,
        total: u32,
    ) -> EngineResult<Boundary<StageInput>> {
        let _guard = self.locks.lock(job_id).await;
        let mut job = self.load(job_id).await?;
        if job.is_terminal() {
            return Ok(Boundary::Stop(job));
        }

        job.enter_stage(stage.clone());
        self.repository.save(&job).await?;
        self.tracker.update(job_id, stage, job.progress).await?;

        Ok(Boundary::Continue(StageInput {
            job_id: job_id.clone(),
            request: job.request.clone(),
            prior_assets: job.generated_assets.clone(),
            index,
            total,
        }))
    }

    /// Call the stage worker, bounded by the stage timeout.
    async fn invoke(&self, name: &str, input: StageInput) -> Result<StageAssets, StageError> {
        let worker = self
            .registry
            .get(name)
            .ok_or_else(|| StageError::MissingWorker(name.to_string()))?;

        match tokio::time::timeout(self.stage_timeout, worker.run(input)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout {
                stage: name.to_string(),
                timeout: self.stage_timeout,
            }),
        }
    }

    /// Lock, reload and fold the stage outcome into the job.
    async fn finish_stage(
        &self,
        job_id: &JobId,
        stage: &WorkflowStage,
        index: u32,
        total: u32,
        outcome: Result<StageAssets, StageError>,
        logger: &JobLogger,
    ) -> EngineResult<Boundary<()>> {
        let _guard = self.locks.lock(job_id).await;
        let mut job = self.load(job_id).await?;

        if job.is_terminal() {
            if let WorkflowStage::Step { name, .. } = stage {
                metrics::record_stage_output_discarded(name);
            }
            logger.log_warning(&format!(
                "discarding output of {}: job is {}",
                stage, job.status
            ));
            return Ok(Boundary::Stop(job));
        }

        match outcome {
            Ok(assets) => {
                let duplicates = job.add_assets(assets);
                for name in duplicates {
                    warn!(job_id = %job_id, asset = %name, "Ignoring duplicate asset");
                }
                job.completed_stages += 1;
                job.advance_progress(stage_progress(index, total));

                self.repository.save(&job).await?;
                self.tracker.update(job_id, stage, job.progress).await?;
                debug!(job_id = %job_id, progress = job.progress, "Stage {} finished", stage);
                Ok(Boundary::Continue(()))
            }
            Err(err) => {
                metrics::record_stage_failure(stage_name(stage), err.kind());
                logger.log_error(&err.to_string());

                job.fail(err.to_string())?;
                self.repository.save(&job).await?;
                Ok(Boundary::Stop(job))
            }
        }
    }

    /// Mark the job COMPLETED after the last stage.
    async fn finalize(&self, job_id: &JobId, logger: &JobLogger) -> EngineResult<Job> {
        let _guard = self.locks.lock(job_id).await;
        let mut job = self.load(job_id).await?;
        if job.is_terminal() {
            return Ok(job);
        }

        job.complete()?;
        self.repository.save(&job).await?;
        self.tracker
            .update(job_id, &WorkflowStage::Finalization, job.progress)
            .await?;

        logger.log_completion(&format!(
            "{} stages, {} assets",
            job.completed_stages,
            job.generated_assets.len()
        ));
        Ok(job)
    }

    async fn load(&self, job_id: &JobId) -> EngineResult<Job> {
        self.repository
            .get(job_id)
            .await?
            .ok_or_else(|| EngineError::not_found(job_id))
    }
}

/// Progress after `completed` of `total` stages. Capped below 100 by the job.
fn stage_progress(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed * 100) / total).min(100) as u8
}

fn stage_name(stage: &WorkflowStage) -> &str {
    match stage {
        WorkflowStage::Step { name, .. } => name,
        WorkflowStage::Planning => "planning",
        WorkflowStage::Finalization => "finalization",
    }
}
