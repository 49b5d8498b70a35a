//! Progress tracking.

use std::collections::HashMap;

use async_trait::async_trait;
use avgen_models::{JobId, ProgressSnapshot, WorkflowStage};
use tokio::sync::RwLock;

use crate::error::TrackerError;

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Records the latest `(stage, progress)` of each job for cheap polling.
///
/// Updates are idempotent and monotone: replaying an update leaves the
/// snapshot untouched, and a lower progress value keeps the previous one.
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Record an update and return the resulting snapshot.
    async fn update(
        &self,
        job_id: &JobId,
        stage: &WorkflowStage,
        progress: u8,
    ) -> TrackerResult<ProgressSnapshot>;

    /// Latest snapshot, or `TrackerError::NotFound`.
    async fn current(&self, job_id: &JobId) -> TrackerResult<ProgressSnapshot>;

    /// Drop the snapshot. Absent ids are ignored.
    async fn remove(&self, job_id: &JobId) -> TrackerResult<()>;
}

/// Process-local tracker.
#[derive(Debug, Default)]
pub struct InMemoryProgressTracker {
    snapshots: RwLock<HashMap<JobId, ProgressSnapshot>>,
}

impl InMemoryProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressTracker for InMemoryProgressTracker {
    async fn update(
        &self,
        job_id: &JobId,
        stage: &WorkflowStage,
        progress: u8,
    ) -> TrackerResult<ProgressSnapshot> {
        let mut snapshots = self.snapshots.write().await;
        let snapshot = snapshots
            .entry(job_id.clone())
            .and_modify(|snap| {
                snap.apply(stage, progress);
            })
            .or_insert_with(|| ProgressSnapshot::new(job_id.clone(), stage.clone(), progress));
        Ok(snapshot.clone())
    }

    async fn current(&self, job_id: &JobId) -> TrackerResult<ProgressSnapshot> {
        self.snapshots
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(job_id.clone()))
    }

    async fn remove(&self, job_id: &JobId) -> TrackerResult<()> {
        self.snapshots.write().await.remove(job_id);
        Ok(())
    }
}
