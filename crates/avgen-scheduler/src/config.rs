//! Scheduler configuration.

use std::time::Duration;

use chrono::NaiveTime;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::gate::{SchedulingPolicy, TimeWindow};
use crate::retry::RetryPolicy;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Master switch for creating new tasks on tick
    pub enabled: bool,
    /// How often the loop ticks
    pub tick_interval: Duration,
    /// UTC time-of-day window in which new tasks may be created
    pub window: Option<TimeWindow>,
    /// Max videos per UTC day (None = unlimited)
    pub daily_video_limit: Option<u32>,
    /// Max spend per UTC day (None = unlimited)
    pub daily_budget: Option<f64>,
    /// Extra attempts after the first failure
    pub retry_attempts: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// Upper bound for backed-off retry delays
    pub retry_max_delay: Duration,
    /// Double the delay on each retry instead of using a fixed one
    pub retry_exponential: bool,
    /// Concurrent task attempts
    pub max_concurrent_tasks: usize,
    /// Upper bound for one task attempt
    pub task_timeout: Duration,
    /// Age after which finished tasks are removed by the cleanup pass
    pub cleanup_max_age: Duration,
    /// Owner recorded on tasks the loop creates
    pub owner_id: String,
    /// Config for tasks the loop creates
    pub task_template: Map<String, Value>,
    /// Cost charged per stage worker call
    pub cost_per_api_call: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: Duration::from_secs(300), // 5 minutes
            window: None,
            daily_video_limit: None,
            daily_budget: None,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(30),
            retry_max_delay: Duration::from_secs(600),
            retry_exponential: false,
            max_concurrent_tasks: 2,
            task_timeout: Duration::from_secs(3600), // 1 hour
            cleanup_max_age: Duration::from_secs(7 * 86400),
            owner_id: "scheduler".to_string(),
            task_template: default_task_template(),
            cost_per_api_call: 0.05,
        }
    }
}

fn default_task_template() -> Map<String, Value> {
    let template = json!({
        "request": {
            "topic": "Daily highlights",
            "target_platform": "youtube",
            "workflow_type": "quick",
            "quality_level": "medium",
            "expected_duration": 60
        },
        "videos": 1
    });

    match template {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_time(name: &str) -> Option<NaiveTime> {
    let raw = std::env::var(name).ok()?;
    match NaiveTime::parse_from_str(raw.trim(), "%H:%M") {
        Ok(t) => Some(t),
        Err(e) => {
            warn!("Ignoring {}='{}': {}", name, raw, e);
            None
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let window = match (
            env_time("SCHEDULER_WINDOW_START"),
            env_time("SCHEDULER_WINDOW_END"),
        ) {
            (Some(start), Some(end)) => Some(TimeWindow::new(start, end)),
            _ => None,
        };

        let task_template = match std::env::var("SCHEDULER_TASK_TEMPLATE") {
            Ok(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Ignoring invalid SCHEDULER_TASK_TEMPLATE: {}", e);
                    defaults.task_template.clone()
                }
            },
            Err(_) => defaults.task_template.clone(),
        };

        Self {
            enabled: env_parse("SCHEDULER_ENABLED").unwrap_or(defaults.enabled),
            tick_interval: env_parse("SCHEDULER_TICK_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick_interval),
            window,
            daily_video_limit: env_parse("SCHEDULER_DAILY_VIDEO_LIMIT"),
            daily_budget: env_parse("SCHEDULER_DAILY_BUDGET"),
            retry_attempts: env_parse("SCHEDULER_RETRY_ATTEMPTS").unwrap_or(defaults.retry_attempts),
            retry_delay: env_parse("SCHEDULER_RETRY_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_delay),
            retry_max_delay: env_parse("SCHEDULER_RETRY_MAX_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_max_delay),
            retry_exponential: env_parse("SCHEDULER_RETRY_EXPONENTIAL")
                .unwrap_or(defaults.retry_exponential),
            max_concurrent_tasks: env_parse("SCHEDULER_MAX_CONCURRENT_TASKS")
                .unwrap_or(defaults.max_concurrent_tasks),
            task_timeout: env_parse("SCHEDULER_TASK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.task_timeout),
            cleanup_max_age: env_parse("SCHEDULER_CLEANUP_MAX_AGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_max_age),
            owner_id: std::env::var("SCHEDULER_OWNER_ID").unwrap_or(defaults.owner_id),
            task_template,
            cost_per_api_call: env_parse("SCHEDULER_COST_PER_API_CALL")
                .unwrap_or(defaults.cost_per_api_call),
        }
    }

    /// Gating policy derived from this config.
    pub fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy {
            enabled: self.enabled,
            window: self.window,
            daily_video_limit: self.daily_video_limit,
            daily_budget: self.daily_budget,
        }
    }

    /// Retry policy derived from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts)
            .with_base_delay(self.retry_delay)
            .with_max_delay(self.retry_max_delay)
            .with_exponential(self.retry_exponential)
    }
}
