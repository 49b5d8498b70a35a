//! Engine metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_INITIALIZED_TOTAL: &str = "avgen_jobs_initialized_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "avgen_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "avgen_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "avgen_jobs_cancelled_total";

    pub const STAGE_DURATION_SECONDS: &str = "avgen_stage_duration_seconds";
    pub const STAGE_FAILURES_TOTAL: &str = "avgen_stage_failures_total";
    pub const STAGE_OUTPUT_DISCARDED_TOTAL: &str = "avgen_stage_output_discarded_total";
}

pub fn record_job_initialized(workflow_type: &str) {
    let labels = [("workflow_type", workflow_type.to_string())];
    counter!(names::JOBS_INITIALIZED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(workflow_type: &str) {
    let labels = [("workflow_type", workflow_type.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

pub fn record_job_failed(workflow_type: &str) {
    let labels = [("workflow_type", workflow_type.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_cancelled(workflow_type: &str) {
    let labels = [("workflow_type", workflow_type.to_string())];
    counter!(names::JOBS_CANCELLED_TOTAL, &labels).increment(1);
}

/// Record how long one stage worker call took.
pub fn record_stage_duration(stage: &str, success: bool, duration_secs: f64) {
    let labels = [
        ("stage", stage.to_string()),
        ("success", success.to_string()),
    ];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_stage_failure(stage: &str, kind: &str) {
    let labels = [("stage", stage.to_string()), ("kind", kind.to_string())];
    counter!(names::STAGE_FAILURES_TOTAL, &labels).increment(1);
}

/// Stage output that arrived after the job was cancelled.
pub fn record_stage_output_discarded(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::STAGE_OUTPUT_DISCARDED_TOTAL, &labels).increment(1);
}
