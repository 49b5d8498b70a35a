//! Workflow orchestration engine.
//!
//! This crate provides:
//! - Completion time estimation
//! - Job and progress stores (in-memory and Redis)
//! - The stage worker seam and stage planning
//! - The pipeline executor with cooperative cancellation
//! - The [`WorkflowEngine`] facade that owns the job state machine

pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod executor;
pub mod locks;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod repository;
pub mod simulated;
pub mod stage;
pub mod store;

pub use config::{EngineConfig, StoreBackend};
pub use engine::WorkflowEngine;
pub use error::{EngineError, EngineResult, RepositoryError, StageError, TrackerError};
pub use estimator::{DurationBucket, TimeEstimator, MIN_ESTIMATE};
pub use executor::PipelineExecutor;
pub use locks::{JobLockGuard, JobLocks};
pub use logging::JobLogger;
pub use progress::{InMemoryProgressTracker, ProgressTracker};
pub use repository::{InMemoryWorkflowRepository, WorkflowRepository};
pub use simulated::SimulatedStage;
pub use stage::{StageAssets, StageInput, StagePlanner, StageRegistry, StageWorker};
pub use store::{RedisProgressTracker, RedisWorkflowRepository, Stores};
