//! Workflow engine facade.
//!
//! Owns the job state machine:
//!
//! ```text
//! INITIALIZED -> PLANNING -> IN_PROGRESS -> COMPLETED
//!      |            |             |
//!      +------------+-------------+--> CANCELLED | FAILED
//! ```
//!
//! Every read-modify-write of a job happens under its per-job lock. Two
//! concurrent `execute` calls for the same id are rejected rather than
//! serialized.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use avgen_models::{
    Job, JobId, ProgressSnapshot, ValidationError, WorkflowRequest, WorkflowStage,
    WorkflowStatus,
};
use chrono::Utc;
use tracing::{info, Instrument};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, TrackerError};
use crate::estimator::TimeEstimator;
use crate::executor::PipelineExecutor;
use crate::locks::JobLocks;
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::{InMemoryProgressTracker, ProgressTracker};
use crate::repository::{InMemoryWorkflowRepository, WorkflowRepository};
use crate::stage::{StagePlanner, StageRegistry};

/// Marks a job as executing for as long as it lives.
struct ExecutingGuard<'a> {
    executing: &'a Mutex<HashSet<JobId>>,
    job_id: JobId,
}

impl<'a> ExecutingGuard<'a> {
    fn acquire(executing: &'a Mutex<HashSet<JobId>>, job_id: &JobId) -> Option<Self> {
        let mut set = executing.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(job_id.clone()) {
            return None;
        }
        Some(Self {
            executing,
            job_id: job_id.clone(),
        })
    }
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.executing.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.job_id);
    }
}

/// Entry point for creating, running, cancelling and removing jobs.
pub struct WorkflowEngine {
    repository: Arc<dyn WorkflowRepository>,
    tracker: Arc<dyn ProgressTracker>,
    estimator: TimeEstimator,
    planner: StagePlanner,
    executor: PipelineExecutor,
    locks: Arc<JobLocks>,
    executing: Mutex<HashSet<JobId>>,
}

impl WorkflowEngine {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        tracker: Arc<dyn ProgressTracker>,
        registry: StageRegistry,
        config: &EngineConfig,
    ) -> Self {
        let locks = Arc::new(JobLocks::new());
        let executor = PipelineExecutor::new(
            repository.clone(),
            tracker.clone(),
            registry,
            locks.clone(),
            config.stage_timeout,
        );

        Self {
            repository,
            tracker,
            estimator: TimeEstimator::default(),
            planner: StagePlanner::new(),
            executor,
            locks,
            executing: Mutex::new(HashSet::new()),
        }
    }

    /// Engine backed by process-local stores.
    pub fn in_memory(registry: StageRegistry, config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(InMemoryWorkflowRepository::new()),
            Arc::new(InMemoryProgressTracker::new()),
            registry,
            config,
        )
    }

    pub fn with_estimator(mut self, estimator: TimeEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn estimator(&self) -> &TimeEstimator {
        &self.estimator
    }

    /// Create and persist a new INITIALIZED job.
    pub async fn initialize(&self, request: WorkflowRequest, owner_id: &str) -> EngineResult<Job> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(ValidationError::Empty { field: "owner_id" }.into());
        }

        let eta = self.estimator.estimated_completion(&request, Utc::now());
        let job = Job::new(owner_id, request, eta);

        {
            let _guard = self.locks.lock(&job.id).await;
            self.repository.save(&job).await?;
            self.tracker
                .update(&job.id, &WorkflowStage::Planning, 0)
                .await?;
        }

        info!(
            job_id = %job.id,
            owner_id = %job.owner_id,
            workflow_type = %job.request.workflow_type(),
            eta = %job.estimated_completion,
            "Initialized workflow job"
        );
        metrics::record_job_initialized(job.request.workflow_type().as_str());
        Ok(job)
    }

    /// Plan and run an INITIALIZED job to a terminal state.
    ///
    /// Stage failures come back as a FAILED job, not as `Err`.
    pub async fn execute(&self, job_id: &JobId) -> EngineResult<Job> {
        let _executing = ExecutingGuard::acquire(&self.executing, job_id)
            .ok_or_else(|| EngineError::AlreadyExecuting(job_id.clone()))?;
        let logger = JobLogger::new(job_id, "execute");

        let stages = {
            let _guard = self.locks.lock(job_id).await;
            let mut job = self.load(job_id).await?;

            // Holding the executing guard, a PLANNING job here is one an
            // earlier execute left behind on a store error; plan it again.
            job.begin_planning()?;
            self.repository.save(&job).await?;
            self.tracker
                .update(job_id, &WorkflowStage::Planning, job.progress)
                .await?;

            let stages = self.planner.plan(&job.request);
            job.start()?;
            self.repository.save(&job).await?;

            logger.log_start(&format!("{} stages: {}", stages.len(), stages.join(", ")));
            stages
        };

        let job = self
            .executor
            .run(job_id, &stages)
            .instrument(logger.span())
            .await?;
        let workflow_type = job.request.workflow_type().as_str();
        match job.status {
            WorkflowStatus::Completed => metrics::record_job_completed(workflow_type),
            WorkflowStatus::Failed => metrics::record_job_failed(workflow_type),
            WorkflowStatus::Cancelled => metrics::record_job_cancelled(workflow_type),
            _ => {}
        }
        Ok(job)
    }

    /// Cancel a non-terminal job.
    pub async fn cancel(&self, job_id: &JobId, reason: &str) -> EngineResult<Job> {
        let _guard = self.locks.lock(job_id).await;
        let mut job = self.load(job_id).await?;

        let reason = if reason.trim().is_empty() {
            "cancelled by user"
        } else {
            reason.trim()
        };
        job.cancel(reason)?;
        self.repository.save(&job).await?;

        JobLogger::new(job_id, "cancel").log_terminal(job.status, reason);
        // Jobs already in the pipeline are counted when `execute` returns.
        if !self.is_executing(job_id) {
            metrics::record_job_cancelled(job.request.workflow_type().as_str());
        }
        Ok(job)
    }

    /// Mark a non-terminal job FAILED from outside the pipeline, for callers
    /// that gave up waiting on `execute`. A pipeline still running for the
    /// job stops at its next stage boundary.
    pub async fn fail(&self, job_id: &JobId, reason: &str) -> EngineResult<Job> {
        let _guard = self.locks.lock(job_id).await;
        let mut job = self.load(job_id).await?;

        let reason = if reason.trim().is_empty() {
            "aborted"
        } else {
            reason.trim()
        };
        job.fail(reason)?;
        self.repository.save(&job).await?;

        JobLogger::new(job_id, "fail").log_terminal(job.status, reason);
        if !self.is_executing(job_id) {
            metrics::record_job_failed(job.request.workflow_type().as_str());
        }
        Ok(job)
    }

    /// Remove a job and its progress. Removing an unknown id is a no-op.
    pub async fn cleanup(&self, job_id: &JobId) -> EngineResult<()> {
        {
            let _guard = self.locks.lock(job_id).await;
            self.repository.delete(job_id).await?;
            self.tracker.remove(job_id).await?;
        }

        info!(job_id = %job_id, "Cleaned up workflow job");
        Ok(())
    }

    pub async fn get(&self, job_id: &JobId) -> EngineResult<Job> {
        self.load(job_id).await
    }

    pub async fn progress(&self, job_id: &JobId) -> EngineResult<ProgressSnapshot> {
        match self.tracker.current(job_id).await {
            Ok(snapshot) => Ok(snapshot),
            Err(TrackerError::NotFound(id)) => Err(EngineError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self, owner_id: &str) -> EngineResult<Vec<Job>> {
        Ok(self.repository.list(owner_id).await?)
    }

    /// Whether an `execute` call for this job is in flight.
    pub fn is_executing(&self, job_id: &JobId) -> bool {
        self.executing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(job_id)
    }

    async fn load(&self, job_id: &JobId) -> EngineResult<Job> {
        self.repository
            .get(job_id)
            .await?
            .ok_or_else(|| EngineError::not_found(job_id))
    }
}
