//! Redis-backed stores and backend selection.
//!
//! Key layout (with the default `avgen` prefix):
//! - `avgen:job:{id}`: job JSON
//! - `avgen:owner:{owner_id}:jobs`: set of job ids
//! - `avgen:progress:{id}`: progress snapshot JSON, expires after the TTL

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use avgen_models::{Job, JobId, ProgressSnapshot, WorkflowStage};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, StoreBackend};
use crate::error::{RepositoryError, TrackerError};
use crate::progress::{InMemoryProgressTracker, ProgressTracker, TrackerResult};
use crate::repository::{InMemoryWorkflowRepository, RepositoryResult, WorkflowRepository};

/// Repository and tracker pair chosen from configuration.
#[derive(Clone)]
pub struct Stores {
    pub repository: Arc<dyn WorkflowRepository>,
    pub tracker: Arc<dyn ProgressTracker>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            repository: Arc::new(InMemoryWorkflowRepository::new()),
            tracker: Arc::new(InMemoryProgressTracker::new()),
        }
    }

    /// Build the stores named by `config.store_backend`.
    pub async fn from_config(config: &EngineConfig) -> Result<Self, RepositoryError> {
        match config.store_backend {
            StoreBackend::Memory => {
                info!("Using in-memory job store");
                Ok(Self::in_memory())
            }
            StoreBackend::Redis => {
                info!("Using Redis job store at {}", config.redis_url);
                let repository =
                    RedisWorkflowRepository::connect(&config.redis_url, &config.redis_prefix)
                        .await?;
                let tracker = RedisProgressTracker::connect(
                    &config.redis_url,
                    &config.redis_prefix,
                    config.progress_ttl,
                )
                .await?;
                Ok(Self {
                    repository: Arc::new(repository),
                    tracker: Arc::new(tracker),
                })
            }
        }
    }
}

async fn connect(redis_url: &str) -> Result<MultiplexedConnection, RepositoryError> {
    let client = redis::Client::open(redis_url)?;
    Ok(client.get_multiplexed_async_connection().await?)
}

/// Jobs stored as JSON strings with a per-owner index set.
pub struct RedisWorkflowRepository {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisWorkflowRepository {
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, RepositoryError> {
        Ok(Self {
            conn: connect(redis_url).await?,
            prefix: prefix.to_string(),
        })
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    fn owner_key(&self, owner_id: &str) -> String {
        format!("{}:owner:{}:jobs", self.prefix, owner_id)
    }
}

#[async_trait]
impl WorkflowRepository for RedisWorkflowRepository {
    async fn save(&self, job: &Job) -> RepositoryResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;

        redis::pipe()
            .atomic()
            .set(self.job_key(&job.id), payload)
            .ignore()
            .sadd(self.owner_key(&job.owner_id), job.id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %job.id, status = %job.status, "Saved job");
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> RepositoryResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(self.job_key(job_id)).await?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, job_id: &JobId) -> RepositoryResult<()> {
        let Some(job) = self.get(job_id).await? else {
            return Ok(());
        };

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(self.job_key(job_id))
            .ignore()
            .srem(self.owner_key(&job.owner_id), job_id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn list(&self, owner_id: &str) -> RepositoryResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(self.owner_key(owner_id)).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&JobId::from(id.clone())).await? {
                Some(job) => jobs.push(job),
                None => warn!(job_id = %id, "Owner index points at a missing job"),
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}

/// Progress snapshots stored as JSON with an expiry.
///
/// The read-apply-write in `update` is not atomic on its own; the engine
/// serializes updates per job with its job lock.
pub struct RedisProgressTracker {
    conn: MultiplexedConnection,
    prefix: String,
    ttl: Duration,
}

impl RedisProgressTracker {
    pub async fn connect(
        redis_url: &str,
        prefix: &str,
        ttl: Duration,
    ) -> Result<Self, RepositoryError> {
        Ok(Self {
            conn: connect(redis_url).await?,
            prefix: prefix.to_string(),
            ttl,
        })
    }

    fn key(&self, job_id: &JobId) -> String {
        format!("{}:progress:{}", self.prefix, job_id)
    }

    async fn read(&self, job_id: &JobId) -> Result<Option<ProgressSnapshot>, RepositoryError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(self.key(job_id)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProgressTracker for RedisProgressTracker {
    async fn update(
        &self,
        job_id: &JobId,
        stage: &WorkflowStage,
        progress: u8,
    ) -> TrackerResult<ProgressSnapshot> {
        let snapshot = match self.read(job_id).await? {
            Some(mut snapshot) => {
                if !snapshot.apply(stage, progress) {
                    return Ok(snapshot);
                }
                snapshot
            }
            None => ProgressSnapshot::new(job_id.clone(), stage.clone(), progress),
        };

        let payload = serde_json::to_string(&snapshot).map_err(RepositoryError::from)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(job_id), payload, self.ttl.as_secs().max(1))
            .await
            .map_err(RepositoryError::from)?;

        Ok(snapshot)
    }

    async fn current(&self, job_id: &JobId) -> TrackerResult<ProgressSnapshot> {
        self.read(job_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(job_id.clone()))
    }

    async fn remove(&self, job_id: &JobId) -> TrackerResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(job_id))
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }
}
