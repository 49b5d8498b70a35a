//! Scheduler-level task definitions.
//!
//! A [`ScheduledTask`] is coarser than a [`crate::Job`]: running one task
//! creates and executes one or more jobs.
//!
//! Conventions:
//! - `priority`: lower value = more urgent (0 runs first).
//! - `attempts` counts invocations and starts at 1 for the first run;
//!   `metrics.retry_attempts_used` is always `attempts - 1`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::job::JobId;

/// Unique identifier for a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its scheduled time or next retry
    #[default]
    Pending,
    /// Claimed by the scheduler and executing
    Running,
    /// Finished successfully
    Completed,
    /// Failed permanently or after exhausting retries
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Usage accumulated by a task across all of its attempts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskMetrics {
    pub videos_generated: u32,
    pub cost_incurred: f64,
    pub api_calls_made: u32,
    /// Wall-clock seconds spent executing
    pub execution_time_secs: f64,
    pub retry_attempts_used: u32,
}

/// A unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScheduledTask {
    pub task_id: TaskId,

    pub owner_id: String,

    /// Runner parameters
    #[serde(default)]
    pub config: Map<String, Value>,

    pub scheduled_time: DateTime<Utc>,

    /// Lower = more urgent
    #[serde(default)]
    pub priority: u8,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default)]
    pub metrics: TaskMetrics,

    /// Videos this task intends to produce (quota accounting)
    #[serde(default = "default_planned_videos")]
    pub planned_videos: u32,

    /// Number of invocations so far
    #[serde(default)]
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When a pending retry becomes due
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Workflow jobs created on behalf of this task, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub job_ids: Vec<JobId>,
}

fn default_planned_videos() -> u32 {
    1
}

impl ScheduledTask {
    /// Create a pending task.
    pub fn new(
        owner_id: impl Into<String>,
        config: Map<String, Value>,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        Self::new_at(owner_id, config, scheduled_time, Utc::now())
    }

    /// Create a pending task with an explicit creation time.
    pub fn new_at(
        owner_id: impl Into<String>,
        config: Map<String, Value>,
        scheduled_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: TaskId::new(),
            owner_id: owner_id.into(),
            config,
            scheduled_time,
            priority: 0,
            status: TaskStatus::Pending,
            metrics: TaskMetrics::default(),
            planned_videos: default_planned_videos(),
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            job_ids: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_planned_videos(mut self, videos: u32) -> Self {
        self.planned_videos = videos;
        self
    }

    /// The instant after which a pending task may run.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.next_attempt_at.unwrap_or(self.scheduled_time)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.due_at() <= now
    }

    /// PENDING -> RUNNING. Returns `false` if the task is not pending.
    pub fn claim(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Running;
        self.attempts += 1;
        self.metrics.retry_attempts_used = self.attempts - 1;
        self.next_attempt_at = None;
        self.updated_at = now;
        true
    }

    /// Add usage from one attempt.
    pub fn record_usage(&mut self, videos: u32, cost: f64, api_calls: u32, elapsed_secs: f64) {
        self.metrics.videos_generated += videos;
        self.metrics.cost_incurred += cost;
        self.metrics.api_calls_made += api_calls;
        self.metrics.execution_time_secs += elapsed_secs;
    }

    /// Remember jobs an attempt created so they can be removed with the task.
    pub fn record_jobs(&mut self, jobs: impl IntoIterator<Item = JobId>) {
        self.job_ids.extend(jobs);
    }

    /// RUNNING -> COMPLETED.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.last_error = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// RUNNING -> PENDING with a retry time.
    pub fn schedule_retry(&mut self, at: DateTime<Utc>, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Pending;
        self.last_error = Some(error.into());
        self.next_attempt_at = Some(at);
        self.updated_at = now;
    }

    /// Terminal failure.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.into());
        self.next_attempt_at = None;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Videos counted against the daily quota: actual output once the
    /// task finished, planned output while it is still pending/running.
    pub fn quota_videos(&self) -> u32 {
        match self.status {
            TaskStatus::Completed | TaskStatus::Failed => self.metrics.videos_generated,
            TaskStatus::Pending | TaskStatus::Running => {
                self.planned_videos.max(self.metrics.videos_generated)
            }
        }
    }
}
