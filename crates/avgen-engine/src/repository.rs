//! Job persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use avgen_models::{Job, JobId};
use tokio::sync::RwLock;

use crate::error::RepositoryError;

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Durable store for workflow jobs.
///
/// `save` overwrites the whole record; the last writer wins. Callers that
/// need read-modify-write atomicity hold the per-job lock from
/// [`crate::locks::JobLocks`] around the sequence.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert or overwrite a job.
    async fn save(&self, job: &Job) -> RepositoryResult<()>;

    async fn get(&self, job_id: &JobId) -> RepositoryResult<Option<Job>>;

    /// Remove a job. Deleting an absent id is not an error.
    async fn delete(&self, job_id: &JobId) -> RepositoryResult<()>;

    /// All jobs belonging to `owner_id`, newest first.
    async fn list(&self, owner_id: &str) -> RepositoryResult<Vec<Job>>;
}

/// Process-local repository.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowRepository {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save(&self, job: &Job) -> RepositoryResult<()> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> RepositoryResult<Option<Job>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn delete(&self, job_id: &JobId) -> RepositoryResult<()> {
        self.jobs.write().await.remove(job_id);
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> RepositoryResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.owner_id == owner_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}
