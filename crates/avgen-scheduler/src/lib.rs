//! Periodic task scheduling for workflow jobs.
//!
//! This crate provides:
//! - [`TaskScheduler`]: lifecycle, tick loop, dispatch and cleanup
//! - Gating policy (enabled, time window, daily quota, daily budget)
//! - Retry policy with fixed or exponential delays
//! - The [`TaskRunner`] seam and an engine-backed runner

pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult, TaskError};
pub use gate::{DailyUsage, SchedulingPolicy, SchedulingPolicyViolation, TimeWindow};
pub use retry::{FailureTracker, RetryPolicy};
pub use runner::{planned_videos, TaskRunner, TaskUsage, WorkflowTaskConfig, WorkflowTaskRunner};
pub use scheduler::{SchedulerState, SchedulerStatus, TaskScheduler, TickOutcome, TickReport};
pub use store::{InMemoryTaskStore, TaskStore};
