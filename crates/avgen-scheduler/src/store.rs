//! Scheduled task storage.

use std::collections::HashMap;

use async_trait::async_trait;
use avgen_models::{ScheduledTask, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{SchedulerError, SchedulerResult};

/// Storage for scheduled tasks.
///
/// `claim` is the only way a task becomes RUNNING and must be atomic, so a
/// task is never executed twice at the same time.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &ScheduledTask) -> SchedulerResult<()>;

    /// Overwrite an existing task.
    async fn update(&self, task: &ScheduledTask) -> SchedulerResult<()>;

    async fn get(&self, task_id: &TaskId) -> SchedulerResult<Option<ScheduledTask>>;

    async fn list(&self) -> SchedulerResult<Vec<ScheduledTask>>;

    /// PENDING tasks due at `now`, most urgent first (priority, then due time).
    async fn due(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<ScheduledTask>>;

    /// Atomically move a due PENDING task to RUNNING.
    ///
    /// Returns `None` if the task is missing, not pending or not yet due.
    async fn claim(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<ScheduledTask>>;

    /// Remove COMPLETED/FAILED tasks that finished before `cutoff` and
    /// return them.
    async fn remove_finished_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SchedulerResult<Vec<ScheduledTask>>;
}

/// Process-local task store.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, ScheduledTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &ScheduledTask) -> SchedulerResult<()> {
        self.tasks
            .write()
            .await
            .insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn update(&self, task: &ScheduledTask) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.task_id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => Err(SchedulerError::TaskNotFound(task.task_id.clone())),
        }
    }

    async fn get(&self, task_id: &TaskId) -> SchedulerResult<Option<ScheduledTask>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        let mut tasks: Vec<ScheduledTask> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn due(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<ScheduledTask>> {
        let mut due: Vec<ScheduledTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.due_at().cmp(&b.due_at()))
        });
        Ok(due)
    }

    async fn claim(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<ScheduledTask>> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            return Ok(None);
        };
        if !task.is_due(now) {
            return Ok(None);
        }

        task.claim(now);
        Ok(Some(task.clone()))
    }

    async fn remove_finished_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SchedulerResult<Vec<ScheduledTask>> {
        let mut tasks = self.tasks.write().await;
        let expired: Vec<TaskId> = tasks
            .values()
            .filter(|task| {
                let finished = matches!(task.status, TaskStatus::Completed | TaskStatus::Failed);
                finished && task.completed_at.unwrap_or(task.updated_at) < cutoff
            })
            .map(|task| task.task_id.clone())
            .collect();

        Ok(expired
            .iter()
            .filter_map(|task_id| tasks.remove(task_id))
            .collect())
    }
}
