//! Workflow job definitions and the job state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::WorkflowRequest;

/// Unique identifier for a workflow job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a workflow job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created and persisted, not yet executed
    #[default]
    Initialized,
    /// Stage plan is being prepared
    Planning,
    /// Stages are running
    InProgress,
    /// All stages finished
    Completed,
    /// Cancelled by a caller
    Cancelled,
    /// A stage failed
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Initialized => "initialized",
            WorkflowStatus::Planning => "planning",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Cancelled | WorkflowStatus::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;

        match self {
            Initialized => matches!(next, Planning | Cancelled | Failed),
            Planning => matches!(next, InProgress | Cancelled | Failed),
            InProgress => matches!(next, Completed | Cancelled | Failed),
            Completed | Cancelled | Failed => false,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The pipeline step a job is currently on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowStage {
    #[default]
    Planning,
    /// One named stage; `index` is 1-based.
    Step { index: u32, name: String },
    Finalization,
}

impl WorkflowStage {
    pub fn step(index: u32, name: impl Into<String>) -> Self {
        WorkflowStage::Step {
            index,
            name: name.into(),
        }
    }

    /// Human-readable label for logs and progress displays.
    pub fn label(&self) -> String {
        match self {
            WorkflowStage::Planning => "planning".to_string(),
            WorkflowStage::Step { index, name } => format!("stage_{}:{}", index, name),
            WorkflowStage::Finalization => "finalization".to_string(),
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Rejected state machine transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid state transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
}

/// One instance of a multi-stage content generation workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Requesting user or tenant
    pub owner_id: String,

    /// Original request
    pub request: WorkflowRequest,

    /// Current status
    #[serde(default)]
    pub status: WorkflowStatus,

    /// Current pipeline step
    #[serde(default)]
    pub stage: WorkflowStage,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Produced assets by name
    #[serde(default)]
    pub generated_assets: BTreeMap<String, String>,

    /// Stages finished successfully
    #[serde(default)]
    pub completed_stages: u32,

    /// Failure or cancellation reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub estimated_completion: DateTime<Utc>,
}

impl Job {
    /// Create a freshly initialized job.
    pub fn new(
        owner_id: impl Into<String>,
        request: WorkflowRequest,
        estimated_completion: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: JobId::new(),
            owner_id: owner_id.into(),
            request,
            status: WorkflowStatus::Initialized,
            stage: WorkflowStage::Planning,
            progress: 0,
            generated_assets: BTreeMap::new(),
            completed_stages: 0,
            error: None,
            created_at: now,
            updated_at: now,
            estimated_completion,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: WorkflowStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// INITIALIZED -> PLANNING.
    ///
    /// A job already in PLANNING was left there by an `execute` that failed
    /// before starting the pipeline; it plans again. Callers must make sure
    /// no other execute is in flight.
    pub fn begin_planning(&mut self) -> Result<(), InvalidTransition> {
        if self.status == WorkflowStatus::Planning {
            self.updated_at = Utc::now();
        } else {
            self.transition(WorkflowStatus::Planning)?;
        }
        self.stage = WorkflowStage::Planning;
        Ok(())
    }

    /// PLANNING -> IN_PROGRESS.
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(WorkflowStatus::InProgress)
    }

    /// Move to a new pipeline step without changing status.
    pub fn enter_stage(&mut self, stage: WorkflowStage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    /// Merge assets produced by a stage.
    ///
    /// Existing names are kept; returns the names that were rejected as
    /// duplicates.
    pub fn add_assets(
        &mut self,
        assets: impl IntoIterator<Item = (String, String)>,
    ) -> Vec<String> {
        let mut duplicates = Vec::new();
        for (name, reference) in assets {
            if self.generated_assets.contains_key(&name) {
                duplicates.push(name);
            } else {
                self.generated_assets.insert(name, reference);
            }
        }
        self.updated_at = Utc::now();
        duplicates
    }

    /// Raise progress for a non-final step.
    ///
    /// Progress never goes down and stays below 100 until the job
    /// completes.
    pub fn advance_progress(&mut self, progress: u8) {
        let capped = progress.min(99);
        if capped > self.progress {
            self.progress = capped;
            self.updated_at = Utc::now();
        }
    }

    /// IN_PROGRESS -> COMPLETED.
    pub fn complete(&mut self) -> Result<(), InvalidTransition> {
        self.transition(WorkflowStatus::Completed)?;
        self.stage = WorkflowStage::Finalization;
        self.progress = 100;
        Ok(())
    }

    /// Any non-terminal state -> FAILED.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(WorkflowStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Any non-terminal state -> CANCELLED.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(WorkflowStatus::Cancelled)?;
        self.error = Some(reason.into());
        Ok(())
    }
}
