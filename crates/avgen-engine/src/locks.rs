//! Per-job mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use avgen_models::JobId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<JobId, Arc<AsyncMutex<()>>>;

/// One async mutex per job id.
///
/// Different ids never contend. Guards are held across the awaits of a
/// single read-modify-write, never across a stage worker call. An entry
/// only lives while someone holds or waits for it.
#[derive(Debug, Default)]
pub struct JobLocks {
    locks: Arc<Mutex<LockMap>>,
}

/// Exclusive access to one job. Releasing the last reference removes the
/// job's entry from the map.
#[derive(Debug)]
pub struct JobLockGuard {
    job_id: JobId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for JobLockGuard {
    fn drop(&mut self) {
        // Checked under the map mutex, so nobody can clone the entry between
        // the count and the removal.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        self.guard.take();
        let unused = locks
            .get(&self.job_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1);
        if unused {
            locks.remove(&self.job_id);
        }
    }
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, job_id: &JobId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `job_id`.
    pub async fn lock(&self, job_id: &JobId) -> JobLockGuard {
        let guard = self.entry(job_id).lock_owned().await;
        JobLockGuard {
            job_id: job_id.clone(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Ids currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_exclusive() {
        let locks = Arc::new(JobLocks::new());
        let id = JobId::new();

        let guard = locks.lock(&id).await;
        let contender = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_ids_do_not_contend() {
        let locks = JobLocks::new();
        let _a = locks.lock(&JobId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&JobId::new())).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_released_entry_is_removed() {
        let locks = JobLocks::new();
        let id = JobId::new();

        let guard = locks.lock(&id).await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert!(locks.is_empty());

        for _ in 0..100 {
            drop(locks.lock(&JobId::new()).await);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_kept_while_someone_waits() {
        let locks = Arc::new(JobLocks::new());
        let id = JobId::new();

        let guard = locks.lock(&id).await;
        let (acquired_tx, acquired_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let waiter = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&id).await;
                acquired_tx.send(()).unwrap();
                release_rx.await.ok();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        acquired_rx.await.unwrap();
        assert_eq!(locks.len(), 1);

        release_tx.send(()).unwrap();
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
