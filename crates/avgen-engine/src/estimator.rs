//! Completion time estimation.
//!
//! The estimate is `base(workflow_type) * quality * duration_bucket`,
//! floored at [`MIN_ESTIMATE`]. All multipliers are positive and
//! increase with the input, so larger requests never estimate less time
//! than smaller ones.

use std::time::Duration;

use avgen_models::{WorkflowRequest, WorkflowType};
use chrono::{DateTime, Utc};

/// Lower bound for any estimate.
pub const MIN_ESTIMATE: Duration = Duration::from_secs(30);

/// Videos up to this length (seconds) fall in the short bucket.
const SHORT_VIDEO_MAX_SECS: u32 = 60;
/// Videos up to this length (seconds) fall in the medium bucket.
const MEDIUM_VIDEO_MAX_SECS: u32 = 300;

/// Expected-duration bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DurationBucket {
    Short,
    Medium,
    Long,
}

impl DurationBucket {
    pub fn for_seconds(secs: u32) -> Self {
        if secs <= SHORT_VIDEO_MAX_SECS {
            DurationBucket::Short
        } else if secs <= MEDIUM_VIDEO_MAX_SECS {
            DurationBucket::Medium
        } else {
            DurationBucket::Long
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            DurationBucket::Short => 0.8,
            DurationBucket::Medium => 1.0,
            DurationBucket::Long => 1.5,
        }
    }
}

/// Deterministic completion time estimator.
#[derive(Debug, Clone)]
pub struct TimeEstimator {
    quick_base: Duration,
    standard_base: Duration,
    custom_base: Duration,
}

impl Default for TimeEstimator {
    fn default() -> Self {
        Self {
            quick_base: Duration::from_secs(180),
            standard_base: Duration::from_secs(600),
            custom_base: Duration::from_secs(900),
        }
    }
}

impl TimeEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the base effort for one workflow type.
    pub fn with_base(mut self, workflow_type: WorkflowType, base: Duration) -> Self {
        match workflow_type {
            WorkflowType::Quick => self.quick_base = base,
            WorkflowType::Standard => self.standard_base = base,
            WorkflowType::Custom => self.custom_base = base,
        }
        self
    }

    fn base(&self, workflow_type: WorkflowType) -> Duration {
        match workflow_type {
            WorkflowType::Quick => self.quick_base,
            WorkflowType::Standard => self.standard_base,
            WorkflowType::Custom => self.custom_base,
        }
    }

    /// Expected time to complete the request. Always at least [`MIN_ESTIMATE`].
    pub fn estimate(&self, request: &WorkflowRequest) -> Duration {
        let bucket = DurationBucket::for_seconds(request.expected_duration());
        let secs = self.base(request.workflow_type()).as_secs_f64()
            * request.quality_level().multiplier()
            * bucket.multiplier();

        Duration::from_secs_f64(secs).max(MIN_ESTIMATE)
    }

    /// Wall-clock instant the request is expected to be done, starting at `from`.
    pub fn estimated_completion(
        &self,
        request: &WorkflowRequest,
        from: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let estimate = self.estimate(request);
        // Estimates are minutes to hours; millisecond precision is plenty.
        from + chrono::Duration::milliseconds(estimate.as_millis() as i64)
    }
}
