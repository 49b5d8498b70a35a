//! Shared data models for the video generation workflow engine.
//!
//! This crate provides Serde-serializable types for:
//! - Validated workflow requests
//! - Workflow jobs and their state machine
//! - Progress snapshots
//! - Scheduler tasks and their usage metrics

pub mod job;
pub mod progress;
pub mod request;
pub mod task;

// Re-export common types
pub use job::{InvalidTransition, Job, JobId, WorkflowStage, WorkflowStatus};
pub use progress::ProgressSnapshot;
pub use request::{
    QualityLevel, TargetPlatform, ValidationError, WorkflowRequest, WorkflowRequestDraft,
    WorkflowType,
};
pub use task::{ScheduledTask, TaskId, TaskMetrics, TaskStatus};
