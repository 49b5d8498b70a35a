//! Workflow engine integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use avgen_engine::{
    EngineConfig, EngineError, InMemoryProgressTracker, InMemoryWorkflowRepository,
    ProgressTracker, RepositoryError, SimulatedStage, StageAssets, StageError, StageInput,
    StageRegistry, StageWorker, TimeEstimator, TrackerError, WorkflowEngine, WorkflowRepository,
};
use avgen_models::{
    Job, JobId, ProgressSnapshot, WorkflowRequest, WorkflowStage, WorkflowStatus, WorkflowType,
};
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

fn config() -> EngineConfig {
    EngineConfig::default().with_stage_timeout(Duration::from_secs(5))
}

fn request(workflow: &str) -> WorkflowRequest {
    WorkflowRequest::parse("Ocean facts", "platform_a", workflow, "medium", 60).unwrap()
}

fn engine(registry: StageRegistry) -> Arc<WorkflowEngine> {
    Arc::new(WorkflowEngine::in_memory(registry, &config()))
}

/// Blocks inside `run` until released.
struct GatedStage {
    name: &'static str,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl GatedStage {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl StageWorker for GatedStage {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, input: StageInput) -> Result<StageAssets, StageError> {
        self.entered.notify_one();
        self.release.notified().await;

        let mut assets = StageAssets::new();
        assets.insert(self.name.to_string(), format!("gated://{}", input.job_id));
        Ok(assets)
    }
}

/// Keeps every snapshot the tracker hands out.
#[derive(Default)]
struct RecordingTracker {
    inner: InMemoryProgressTracker,
    seen: Mutex<Vec<ProgressSnapshot>>,
}

#[async_trait]
impl ProgressTracker for RecordingTracker {
    async fn update(
        &self,
        job_id: &JobId,
        stage: &WorkflowStage,
        progress: u8,
    ) -> Result<ProgressSnapshot, TrackerError> {
        let snapshot = self.inner.update(job_id, stage, progress).await?;
        self.seen.lock().unwrap().push(snapshot.clone());
        Ok(snapshot)
    }

    async fn current(&self, job_id: &JobId) -> Result<ProgressSnapshot, TrackerError> {
        self.inner.current(job_id).await
    }

    async fn remove(&self, job_id: &JobId) -> Result<(), TrackerError> {
        self.inner.remove(job_id).await
    }
}

/// Rejects the first save that moves a job to IN_PROGRESS.
#[derive(Default)]
struct StartRejectingRepository {
    inner: InMemoryWorkflowRepository,
    rejected: AtomicBool,
}

#[async_trait]
impl WorkflowRepository for StartRejectingRepository {
    async fn save(&self, job: &Job) -> Result<(), RepositoryError> {
        if job.status == WorkflowStatus::InProgress && !self.rejected.swap(true, Ordering::SeqCst) {
            return Err(RepositoryError::backend("connection reset"));
        }
        self.inner.save(job).await
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<Job>, RepositoryError> {
        self.inner.get(job_id).await
    }

    async fn delete(&self, job_id: &JobId) -> Result<(), RepositoryError> {
        self.inner.delete(job_id).await
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<Job>, RepositoryError> {
        self.inner.list(owner_id).await
    }
}

#[tokio::test]
async fn test_initialize_persists_job() {
    let engine = engine(SimulatedStage::registry(Duration::ZERO));

    let job = assert_ok!(engine.initialize(request("quick"), "user123").await);
    assert_eq!(job.status, WorkflowStatus::Initialized);
    assert_eq!(job.stage, WorkflowStage::Planning);
    assert_eq!(job.progress, 0);
    assert!(job.estimated_completion > job.created_at);
    assert!(job.estimated_completion - job.created_at <= chrono::Duration::minutes(3));

    assert_eq!(assert_ok!(engine.get(&job.id).await), job);
    assert_eq!(assert_ok!(engine.progress(&job.id).await).progress, 0);
}

#[tokio::test]
async fn test_initialize_uses_configured_estimator() {
    let estimator = TimeEstimator::new().with_base(WorkflowType::Quick, Duration::from_secs(3600));
    let engine = WorkflowEngine::in_memory(StageRegistry::new(), &config()).with_estimator(estimator);

    let job = assert_ok!(engine.initialize(request("quick"), "user123").await);
    // medium quality, 60 s falls in the short bucket (0.8)
    assert_eq!(engine.estimator().estimate(&job.request), Duration::from_secs(2880));
    assert!(job.estimated_completion - job.created_at > chrono::Duration::minutes(47));
}

#[tokio::test]
async fn test_initialize_rejects_empty_owner() {
    let engine = engine(StageRegistry::new());
    let err = assert_err!(engine.initialize(request("quick"), "  ").await);
    assert!(matches!(err, EngineError::Validation(ref e) if e.field() == "owner_id"));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_standard_workflow_completes_four_stages() {
    let tracker = Arc::new(RecordingTracker::default());
    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(InMemoryWorkflowRepository::new()),
        tracker.clone(),
        SimulatedStage::registry(Duration::ZERO),
        &config(),
    ));

    let job = assert_ok!(engine.initialize(request("standard"), "user123").await);
    let done = assert_ok!(engine.execute(&job.id).await);

    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.stage, WorkflowStage::Finalization);
    assert_eq!(done.progress, 100);
    assert_eq!(done.completed_stages, 4);
    assert_eq!(done.generated_assets.len(), 4);
    assert!(done.error.is_none());

    let snapshot = assert_ok!(engine.progress(&job.id).await);
    assert_eq!(snapshot.progress, 100);
    assert_eq!(snapshot.stage, WorkflowStage::Finalization);

    // Progress only moves forward and hits 100 only at the end
    let seen = tracker.seen.lock().unwrap().clone();
    assert!(seen.windows(2).all(|w| w[0].progress <= w[1].progress));
    let (last, rest) = seen.split_last().unwrap();
    assert_eq!(last.progress, 100);
    assert!(rest.iter().all(|s| s.progress < 100));
}

#[tokio::test]
async fn test_cancel_before_execute() {
    let engine = engine(SimulatedStage::registry(Duration::ZERO));
    let job = assert_ok!(engine.initialize(request("quick"), "user123").await);

    let cancelled = assert_ok!(engine.cancel(&job.id, "changed my mind").await);
    assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
    assert_eq!(cancelled.error.as_deref(), Some("changed my mind"));

    let err = assert_err!(engine.execute(&job.id).await);
    assert!(matches!(err, EngineError::InvalidStateTransition(_)));
    assert_eq!(assert_ok!(engine.get(&job.id).await), cancelled);
}

#[tokio::test]
async fn test_terminal_job_rejects_cancel_and_execute() {
    let engine = engine(SimulatedStage::registry(Duration::ZERO));
    let job = assert_ok!(engine.initialize(request("quick"), "user123").await);
    let done = assert_ok!(engine.execute(&job.id).await);
    assert_eq!(done.status, WorkflowStatus::Completed);

    let err = assert_err!(engine.cancel(&job.id, "too late").await);
    assert!(matches!(err, EngineError::InvalidStateTransition(_)));
    let err = assert_err!(engine.execute(&job.id).await);
    assert!(matches!(err, EngineError::InvalidStateTransition(_)));

    assert_eq!(assert_ok!(engine.get(&job.id).await), done);
}

#[tokio::test]
async fn test_stage_failure_keeps_prior_assets() {
    let registry = SimulatedStage::registry(Duration::ZERO).with(Arc::new(
        SimulatedStage::new("voice_synthesis").failing("tts quota exceeded"),
    ));
    let engine = engine(registry);

    let job = assert_ok!(engine.initialize(request("standard"), "user123").await);
    let failed = assert_ok!(engine.execute(&job.id).await);

    assert_eq!(failed.status, WorkflowStatus::Failed);
    assert_eq!(failed.stage, WorkflowStage::step(3, "voice_synthesis"));
    assert!(failed.error.as_deref().unwrap().contains("tts quota exceeded"));
    assert_eq!(failed.completed_stages, 2);
    assert!(failed.generated_assets.contains_key("script_generation"));
    assert!(failed.generated_assets.contains_key("image_creation"));
    assert!(!failed.generated_assets.contains_key("composition"));
    assert!(failed.progress < 100);
}

#[tokio::test]
async fn test_missing_worker_fails_job() {
    let registry = StageRegistry::new().with(Arc::new(SimulatedStage::new("script_generation")));
    let engine = engine(registry);

    let job = assert_ok!(engine.initialize(request("quick"), "user123").await);
    let failed = assert_ok!(engine.execute(&job.id).await);

    assert_eq!(failed.status, WorkflowStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("voice_synthesis"));
    assert_eq!(failed.generated_assets.len(), 1);
}

#[tokio::test]
async fn test_stage_timeout_fails_job() {
    let registry = SimulatedStage::registry(Duration::ZERO).with(Arc::new(
        SimulatedStage::new("composition").with_delay(Duration::from_secs(2)),
    ));
    let config = EngineConfig::default().with_stage_timeout(Duration::from_millis(50));
    let engine = WorkflowEngine::in_memory(registry, &config);

    let job = assert_ok!(engine.initialize(request("quick"), "user123").await);
    let failed = assert_ok!(engine.execute(&job.id).await);

    assert_eq!(failed.status, WorkflowStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_cancel_during_stage_discards_its_output() {
    let gated = Arc::new(GatedStage::new("image_creation"));
    let voice = Arc::new(SimulatedStage::new("voice_synthesis"));
    let registry = SimulatedStage::registry(Duration::ZERO)
        .with(gated.clone())
        .with(voice.clone());
    let engine = engine(registry);

    let job = assert_ok!(engine.initialize(request("standard"), "user123").await);
    let run = {
        let engine = engine.clone();
        let id = job.id.clone();
        tokio::spawn(async move { engine.execute(&id).await })
    };

    gated.entered.notified().await;
    let cancelled = assert_ok!(engine.cancel(&job.id, "user requested").await);
    assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
    gated.release.notify_one();

    let finished = assert_ok!(run.await.unwrap());
    assert_eq!(finished.status, WorkflowStatus::Cancelled);
    assert!(finished.generated_assets.contains_key("script_generation"));
    assert!(!finished.generated_assets.contains_key("image_creation"));
    assert_eq!(voice.calls(), 0);
    assert!(!engine.is_executing(&job.id));
}

#[tokio::test]
async fn test_concurrent_execute_is_rejected() {
    let gated = Arc::new(GatedStage::new("script_generation"));
    let registry = SimulatedStage::registry(Duration::ZERO).with(gated.clone());
    let engine = engine(registry);

    let job = assert_ok!(engine.initialize(request("quick"), "user123").await);
    let run = {
        let engine = engine.clone();
        let id = job.id.clone();
        tokio::spawn(async move { engine.execute(&id).await })
    };

    gated.entered.notified().await;
    assert!(engine.is_executing(&job.id));
    let err = assert_err!(engine.execute(&job.id).await);
    assert!(matches!(err, EngineError::AlreadyExecuting(_)));

    gated.release.notify_one();
    let done = assert_ok!(run.await.unwrap());
    assert_eq!(done.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let engine = engine(SimulatedStage::registry(Duration::ZERO));
    let job = assert_ok!(engine.initialize(request("quick"), "user123").await);
    assert_ok!(engine.execute(&job.id).await);

    assert_ok!(engine.cleanup(&job.id).await);
    assert_ok!(engine.cleanup(&job.id).await);

    assert!(matches!(
        engine.get(&job.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.progress(&job.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let engine = engine(StageRegistry::new());
    let id = JobId::new();

    assert!(matches!(engine.execute(&id).await, Err(EngineError::NotFound(_))));
    assert!(matches!(
        engine.cancel(&id, "x").await,
        Err(EngineError::NotFound(_))
    ));
    assert_ok!(engine.cleanup(&id).await);
}

#[tokio::test]
async fn test_list_by_owner() {
    let engine = engine(StageRegistry::new());
    assert_ok!(engine.initialize(request("quick"), "alice").await);
    assert_ok!(engine.initialize(request("custom"), "alice").await);
    assert_ok!(engine.initialize(request("quick"), "bob").await);

    assert_eq!(assert_ok!(engine.list("alice").await).len(), 2);
    assert_eq!(assert_ok!(engine.list("bob").await).len(), 1);
}

#[tokio::test]
async fn test_store_error_while_planning_can_be_retried() {
    let engine = WorkflowEngine::new(
        Arc::new(StartRejectingRepository::default()),
        Arc::new(InMemoryProgressTracker::new()),
        SimulatedStage::registry(Duration::ZERO),
        &config(),
    );
    let job = assert_ok!(engine.initialize(request("quick"), "user123").await);

    let err = assert_err!(engine.execute(&job.id).await);
    assert!(matches!(err, EngineError::Repository(_)));
    assert_eq!(assert_ok!(engine.get(&job.id).await).status, WorkflowStatus::Planning);
    assert!(!engine.is_executing(&job.id));

    let done = assert_ok!(engine.execute(&job.id).await);
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.completed_stages, 3);
}

#[tokio::test]
async fn test_fail_stops_running_pipeline() {
    let gated = Arc::new(GatedStage::new("script_generation"));
    let registry = SimulatedStage::registry(Duration::ZERO).with(gated.clone());
    let engine = engine(registry);

    let job = assert_ok!(engine.initialize(request("quick"), "user123").await);
    let run = {
        let engine = engine.clone();
        let id = job.id.clone();
        tokio::spawn(async move { engine.execute(&id).await })
    };

    gated.entered.notified().await;
    let failed = assert_ok!(engine.fail(&job.id, "caller gave up").await);
    assert_eq!(failed.status, WorkflowStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("caller gave up"));
    gated.release.notify_one();

    let finished = assert_ok!(run.await.unwrap());
    assert_eq!(finished.status, WorkflowStatus::Failed);
    assert!(finished.generated_assets.is_empty());

    let err = assert_err!(engine.fail(&job.id, "again").await);
    assert!(matches!(err, EngineError::InvalidStateTransition(_)));
}
