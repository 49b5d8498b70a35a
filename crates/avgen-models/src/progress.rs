//! Progress snapshots for polling.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{JobId, WorkflowStage};

/// Latest progress of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub stage: WorkflowStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Sequence number, bumped only when the snapshot actually changes
    pub seq: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(job_id: JobId, stage: WorkflowStage, progress: u8) -> Self {
        Self {
            job_id,
            stage,
            progress: progress.min(100),
            seq: 1,
            updated_at: Utc::now(),
        }
    }

    /// Apply an update.
    ///
    /// Lower progress values are ignored so the reported progress never
    /// moves backwards. Returns `false` when nothing changed, which makes
    /// replaying the same update a no-op.
    pub fn apply(&mut self, stage: &WorkflowStage, progress: u8) -> bool {
        let progress = progress.min(100).max(self.progress);
        if self.stage == *stage && self.progress == progress {
            return false;
        }

        self.stage = stage.clone();
        self.progress = progress;
        self.seq += 1;
        self.updated_at = Utc::now();
        true
    }
}
