//! Scheduler metrics.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const TICKS_TOTAL: &str = "avgen_scheduler_ticks_total";
    pub const TICKS_DECLINED_TOTAL: &str = "avgen_scheduler_ticks_declined_total";
    pub const IN_FLIGHT: &str = "avgen_scheduler_in_flight";

    pub const TASKS_CREATED_TOTAL: &str = "avgen_tasks_created_total";
    pub const TASKS_DISPATCHED_TOTAL: &str = "avgen_tasks_dispatched_total";
    pub const TASKS_COMPLETED_TOTAL: &str = "avgen_tasks_completed_total";
    pub const TASKS_FAILED_TOTAL: &str = "avgen_tasks_failed_total";
    pub const TASK_RETRIES_TOTAL: &str = "avgen_task_retries_total";
    pub const TASK_DURATION_SECONDS: &str = "avgen_task_duration_seconds";
    pub const TASKS_CLEANED_TOTAL: &str = "avgen_tasks_cleaned_total";
}

pub fn record_tick(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::TICKS_TOTAL, &labels).increment(1);
}

/// Record a tick that a gate declined.
pub fn record_tick_declined(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::TICKS_DECLINED_TOTAL, &labels).increment(1);
}

pub fn set_in_flight(count: usize) {
    gauge!(names::IN_FLIGHT).set(count as f64);
}

pub fn record_task_created() {
    counter!(names::TASKS_CREATED_TOTAL).increment(1);
}

pub fn record_task_dispatched() {
    counter!(names::TASKS_DISPATCHED_TOTAL).increment(1);
}

pub fn record_task_completed(duration_secs: f64) {
    counter!(names::TASKS_COMPLETED_TOTAL).increment(1);
    histogram!(names::TASK_DURATION_SECONDS).record(duration_secs);
}

pub fn record_task_failed(retryable: bool) {
    let labels = [("retryable", retryable.to_string())];
    counter!(names::TASKS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_task_retry() {
    counter!(names::TASK_RETRIES_TOTAL).increment(1);
}

pub fn record_tasks_cleaned(count: usize) {
    counter!(names::TASKS_CLEANED_TOTAL).increment(count as u64);
}
