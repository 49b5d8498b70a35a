//! Gating policy for creating new tasks.
//!
//! Gates run in a fixed order: enabled, time window, daily video quota,
//! daily budget. The first failing gate is reported; a declined tick is
//! ordinary control flow, not an error.

use avgen_models::ScheduledTask;
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// UTC time-of-day window. `start > end` wraps past midnight;
/// `start == end` covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Start inclusive, end exclusive.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Videos and spend attributed to one UTC day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DailyUsage {
    pub day: Option<NaiveDate>,
    pub videos: u32,
    pub cost: f64,
}

impl DailyUsage {
    /// Sum usage of tasks belonging to `day`.
    ///
    /// Finished tasks count on the day they finished, with their actual
    /// output. Pending and running tasks count on their scheduled day with
    /// their planned output, so back-to-back ticks cannot overshoot the quota.
    pub fn for_day<'a>(tasks: impl IntoIterator<Item = &'a ScheduledTask>, day: NaiveDate) -> Self {
        let mut usage = DailyUsage {
            day: Some(day),
            ..Default::default()
        };

        for task in tasks {
            let counted_on = task.completed_at.unwrap_or(task.scheduled_time).date_naive();
            if counted_on != day {
                continue;
            }
            usage.videos += task.quota_videos();
            usage.cost += task.metrics.cost_incurred;
        }
        usage
    }
}

/// Why a tick declined to create a task.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum SchedulingPolicyViolation {
    #[error("scheduling is disabled")]
    Disabled,

    #[error("{now} is outside the scheduling window {start}-{end} UTC")]
    OutsideTimeWindow {
        now: NaiveTime,
        start: NaiveTime,
        end: NaiveTime,
    },

    #[error("daily video quota reached ({used}/{limit})")]
    DailyQuotaReached { used: u32, limit: u32 },

    #[error("daily budget exhausted ({spent:.2}/{budget:.2})")]
    DailyBudgetExhausted { spent: f64, budget: f64 },
}

impl SchedulingPolicyViolation {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            SchedulingPolicyViolation::Disabled => "disabled",
            SchedulingPolicyViolation::OutsideTimeWindow { .. } => "time_window",
            SchedulingPolicyViolation::DailyQuotaReached { .. } => "daily_quota",
            SchedulingPolicyViolation::DailyBudgetExhausted { .. } => "daily_budget",
        }
    }
}

/// The gates a tick must pass before it creates a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulingPolicy {
    pub enabled: bool,
    pub window: Option<TimeWindow>,
    pub daily_video_limit: Option<u32>,
    pub daily_budget: Option<f64>,
}

impl SchedulingPolicy {
    pub fn evaluate(
        &self,
        now: DateTime<Utc>,
        usage: &DailyUsage,
    ) -> Result<(), SchedulingPolicyViolation> {
        if !self.enabled {
            return Err(SchedulingPolicyViolation::Disabled);
        }

        if let Some(window) = self.window {
            // Minute precision keeps the error message readable
            let time = now.time().with_second(0).and_then(|t| t.with_nanosecond(0));
            let time = time.unwrap_or_else(|| now.time());
            if !window.contains(time) {
                return Err(SchedulingPolicyViolation::OutsideTimeWindow {
                    now: time,
                    start: window.start,
                    end: window.end,
                });
            }
        }

        if let Some(limit) = self.daily_video_limit {
            if usage.videos >= limit {
                return Err(SchedulingPolicyViolation::DailyQuotaReached {
                    used: usage.videos,
                    limit,
                });
            }
        }

        if let Some(budget) = self.daily_budget {
            if usage.cost >= budget {
                return Err(SchedulingPolicyViolation::DailyBudgetExhausted {
                    spent: usage.cost,
                    budget,
                });
            }
        }

        Ok(())
    }
}
