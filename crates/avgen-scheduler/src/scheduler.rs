//! Periodic task scheduler.
//!
//! Lifecycle: STOPPED -> RUNNING <-> PAUSED -> STOPPED.
//!
//! Each tick first dispatches PENDING tasks that are due (new tasks and
//! retries), then evaluates the gates and, if they all pass, creates one
//! task from the configured template. Attempts run on spawned tasks
//! bounded by a semaphore; retries are armed as timers, so neither a
//! running attempt nor a retry delay ever holds up the tick loop.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use avgen_models::{ScheduledTask, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult, TaskError};
use crate::gate::{DailyUsage, SchedulingPolicy, SchedulingPolicyViolation};
use crate::metrics;
use crate::retry::{FailureTracker, RetryPolicy};
use crate::runner::{planned_videos, TaskRunner, TaskUsage};
use crate::store::TaskStore;

/// Lower bound for the tick interval.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
    Paused,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Running => "running",
            SchedulerState::Paused => "paused",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a tick created a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Scheduled { task_id: TaskId },
    Declined(SchedulingPolicyViolation),
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    /// Attempts started by this tick (due tasks and the new task)
    pub dispatched: usize,
    #[serde(flatten)]
    pub outcome: TickOutcome,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub in_flight: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub today: DailyUsage,
}

struct Inner {
    config: SchedulerConfig,
    policy: SchedulingPolicy,
    retry: RetryPolicy,
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn TaskRunner>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    /// Attempts plus armed retry timers
    in_flight: watch::Sender<usize>,
    state: watch::Sender<SchedulerState>,
}

/// Counts one attempt or retry timer as in flight until dropped.
struct InFlight {
    inner: Arc<Inner>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .send_modify(|n| *n = n.saturating_sub(1));
        metrics::set_in_flight(*self.inner.in_flight.borrow());
    }
}

impl Inner {
    fn enter(self: &Arc<Self>) -> InFlight {
        self.in_flight.send_modify(|n| *n += 1);
        metrics::set_in_flight(*self.in_flight.borrow());
        InFlight {
            inner: Arc::clone(self),
        }
    }

    fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    async fn tick(self: &Arc<Self>) -> SchedulerResult<TickReport> {
        let now = self.clock.now();
        let mut dispatched = self.dispatch_due(now).await?;

        let tasks = self.store.list().await?;
        let usage = DailyUsage::for_day(&tasks, now.date_naive());
        if let Err(violation) = self.policy.evaluate(now, &usage) {
            info!(reason = violation.reason(), "Scheduler tick declined: {}", violation);
            metrics::record_tick("declined");
            metrics::record_tick_declined(violation.reason());
            return Ok(TickReport {
                dispatched,
                outcome: TickOutcome::Declined(violation),
            });
        }

        let template = self.config.task_template.clone();
        let task = ScheduledTask::new_at(&self.config.owner_id, template, now, now)
            .with_planned_videos(planned_videos(&self.config.task_template));
        self.store.insert(&task).await?;
        metrics::record_task_created();
        info!(task_id = %task.task_id, "Scheduler created task");

        if self.dispatch(&task.task_id, now).await? {
            dispatched += 1;
        }
        metrics::record_tick("scheduled");

        Ok(TickReport {
            dispatched,
            outcome: TickOutcome::Scheduled {
                task_id: task.task_id,
            },
        })
    }

    async fn dispatch_due(self: &Arc<Self>, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let mut dispatched = 0;
        for task in self.store.due(now).await? {
            if self.permits.available_permits() == 0 {
                debug!("All task slots busy, leaving due tasks for the next tick");
                break;
            }
            if self.dispatch(&task.task_id, now).await? {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Claim a due task and start an attempt. Returns `false` when no slot
    /// is free or the task cannot be claimed (not due, already running).
    async fn dispatch(self: &Arc<Self>, task_id: &TaskId, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            return Ok(false);
        };
        let guard = self.enter();
        let Some(task) = self.store.claim(task_id, now).await? else {
            return Ok(false);
        };

        metrics::record_task_dispatched();
        debug!(task_id = %task.task_id, attempt = task.attempts, "Dispatching task");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            inner.run_attempt(task).await;
        });
        Ok(true)
    }

    async fn run_attempt(self: &Arc<Self>, mut task: ScheduledTask) {
        let started = Instant::now();
        let mut usage = TaskUsage::default();
        let timeout = self.config.task_timeout;

        let attempt = tokio::time::timeout(timeout, self.runner.run(&task, &mut usage)).await;
        let result = match attempt {
            Ok(result) => result,
            Err(_) => {
                self.runner.abandon(&task, &usage).await;
                Err(TaskError::retryable(format!(
                    "attempt timed out after {:?}",
                    timeout
                )))
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        let now = self.clock.now();
        task.record_usage(usage.videos, usage.cost, usage.api_calls, elapsed);
        task.record_jobs(usage.jobs);

        match result {
            Ok(()) => {
                task.complete(now);
                metrics::record_task_completed(elapsed);
                info!(
                    task_id = %task.task_id,
                    attempts = task.attempts,
                    videos = task.metrics.videos_generated,
                    "Task completed"
                );
            }
            Err(err)
                if err.is_retryable() && self.retry.should_retry(task.metrics.retry_attempts_used) =>
            {
                let retry = task.metrics.retry_attempts_used + 1;
                let delay = self.retry.delay_for_retry(retry);
                let due = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                task.schedule_retry(due, err.to_string(), now);
                metrics::record_task_retry();
                warn!(
                    task_id = %task.task_id,
                    attempt = task.attempts,
                    "Task attempt failed, retry {}/{} in {:?}: {}",
                    retry,
                    self.retry.max_retries(),
                    delay,
                    err
                );

                if self.persist(&task).await {
                    self.arm_retry(task.task_id.clone(), delay, due);
                }
                return;
            }
            Err(err) => {
                let message = if err.is_retryable() {
                    format!("failed after {} attempts: {}", task.attempts, err)
                } else {
                    err.to_string()
                };
                metrics::record_task_failed(err.is_retryable());
                error!(task_id = %task.task_id, "Task failed: {}", message);
                task.fail(message, now);
            }
        }

        self.persist(&task).await;
    }

    /// Fire a retry once its delay has passed.
    fn arm_retry(self: &Arc<Self>, task_id: TaskId, delay: Duration, due: DateTime<Utc>) {
        let guard = self.enter();
        let inner = Arc::clone(self);

        tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(delay).await;

            // The timer firing means the retry is due, even if the clock lags
            let now = inner.clock.now().max(due);
            match inner.dispatch(&task_id, now).await {
                Ok(true) => {}
                Ok(false) => debug!(task_id = %task_id, "Retry left for the next tick"),
                Err(e) => warn!(task_id = %task_id, "Failed to dispatch retry: {}", e),
            }
        });
    }

    async fn persist(&self, task: &ScheduledTask) -> bool {
        match self.store.update(task).await {
            Ok(()) => true,
            Err(e) => {
                error!(task_id = %task.task_id, "Failed to persist task: {}", e);
                false
            }
        }
    }

    async fn cleanup(&self, max_age: Duration) -> SchedulerResult<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| SchedulerError::store(format!("invalid cleanup age: {}", e)))?;
        let cutoff = self.clock.now() - max_age;

        let removed = self.store.remove_finished_before(cutoff).await?;
        for task in &removed {
            self.runner.release(task).await;
        }
        if !removed.is_empty() {
            info!("Removed {} finished tasks older than {}", removed.len(), cutoff);
            metrics::record_tasks_cleaned(removed.len());
        }
        Ok(removed.len())
    }
}

async fn run_loop(inner: Arc<Inner>, mut state: watch::Receiver<SchedulerState>) {
    let mut interval = tokio::time::interval(inner.config.tick_interval.max(MIN_TICK_INTERVAL));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = FailureTracker::new(3);

    info!(
        "Scheduler loop started, ticking every {:?}",
        inner.config.tick_interval
    );

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() || *state.borrow_and_update() == SchedulerState::Stopped {
                    break;
                }
            }
            _ = interval.tick() => {
                if *state.borrow() != SchedulerState::Running {
                    continue;
                }

                let result = match inner.tick().await {
                    Ok(report) => inner.cleanup(inner.config.cleanup_max_age).await.map(|_| report),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(report) => {
                        failures.record_success();
                        debug!(dispatched = report.dispatched, "Scheduler tick finished");
                    }
                    Err(e) => {
                        if failures.record_failure() {
                            error!("Scheduler tick failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    info!("Scheduler loop stopped");
}

/// Periodic driver that creates, runs and retries scheduled tasks.
pub struct TaskScheduler {
    inner: Arc<Inner>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self::with_clock(config, store, runner, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn TaskRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (in_flight, _) = watch::channel(0usize);
        let (state, _) = watch::channel(SchedulerState::Stopped);

        let inner = Inner {
            policy: config.policy(),
            retry: config.retry_policy(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
            config,
            store,
            runner,
            clock,
            in_flight,
            state,
        };

        Self {
            inner: Arc::new(inner),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    /// Start the loop. No-op when running; resumes when paused.
    pub async fn start(&self) -> SchedulerResult<SchedulerState> {
        let mut handle = self.loop_handle.lock().await;

        match self.state() {
            SchedulerState::Running => {}
            SchedulerState::Paused => {
                self.inner.state.send_replace(SchedulerState::Running);
                info!("Scheduler resumed");
            }
            SchedulerState::Stopped => {
                self.inner.state.send_replace(SchedulerState::Running);
                let receiver = self.inner.state.subscribe();
                *handle = Some(tokio::spawn(run_loop(Arc::clone(&self.inner), receiver)));
                info!("Scheduler started");
            }
        }
        Ok(self.state())
    }

    /// Stop the loop and wait for it to exit. No-op when stopped.
    ///
    /// Attempts already running and armed retries are not interrupted; use
    /// [`TaskScheduler::wait_idle`] to wait for them.
    pub async fn stop(&self) -> SchedulerResult<SchedulerState> {
        let mut handle = self.loop_handle.lock().await;
        if self.state() == SchedulerState::Stopped {
            return Ok(SchedulerState::Stopped);
        }

        self.inner.state.send_replace(SchedulerState::Stopped);
        if let Some(handle) = handle.take() {
            if let Err(e) = handle.await {
                warn!("Scheduler loop ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
        Ok(SchedulerState::Stopped)
    }

    /// Suspend ticking. Only valid while running; no-op when paused.
    pub async fn pause(&self) -> SchedulerResult<SchedulerState> {
        let _handle = self.loop_handle.lock().await;
        match self.state() {
            SchedulerState::Running => {
                self.inner.state.send_replace(SchedulerState::Paused);
                info!("Scheduler paused");
                Ok(SchedulerState::Paused)
            }
            SchedulerState::Paused => Ok(SchedulerState::Paused),
            from @ SchedulerState::Stopped => Err(SchedulerError::InvalidTransition {
                from,
                action: "pause",
            }),
        }
    }

    /// Continue ticking. Only valid while paused; no-op when running.
    pub async fn resume(&self) -> SchedulerResult<SchedulerState> {
        let _handle = self.loop_handle.lock().await;
        match self.state() {
            SchedulerState::Paused => {
                self.inner.state.send_replace(SchedulerState::Running);
                info!("Scheduler resumed");
                Ok(SchedulerState::Running)
            }
            SchedulerState::Running => Ok(SchedulerState::Running),
            from @ SchedulerState::Stopped => Err(SchedulerError::InvalidTransition {
                from,
                action: "resume",
            }),
        }
    }

    /// Run one tick now, regardless of lifecycle state.
    pub async fn tick(&self) -> SchedulerResult<TickReport> {
        self.inner.tick().await
    }

    /// Enqueue a caller-built task. Dispatched right away when the
    /// scheduler is running and the task is due, otherwise on a later tick.
    pub async fn schedule(&self, mut task: ScheduledTask) -> SchedulerResult<ScheduledTask> {
        task.status = TaskStatus::Pending;
        self.inner.store.insert(&task).await?;
        info!(task_id = %task.task_id, scheduled_time = %task.scheduled_time, "Task scheduled");

        let now = self.inner.clock.now();
        if self.state() == SchedulerState::Running && task.is_due(now) {
            self.inner.dispatch(&task.task_id, now).await?;
        }
        self.get_task(&task.task_id).await
    }

    pub async fn get_task(&self, task_id: &TaskId) -> SchedulerResult<ScheduledTask> {
        self.inner
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.clone()))
    }

    pub async fn list_tasks(&self) -> SchedulerResult<Vec<ScheduledTask>> {
        self.inner.store.list().await
    }

    /// Remove COMPLETED/FAILED tasks older than `max_age`, along with the
    /// workflow jobs they created. Returns the number of tasks removed.
    pub async fn cleanup(&self, max_age: Duration) -> SchedulerResult<usize> {
        self.inner.cleanup(max_age).await
    }

    /// Attempts and retry timers currently in flight.
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Resolve once no attempt is running and no retry timer is armed.
    pub async fn wait_idle(&self) {
        let mut receiver = self.inner.in_flight.subscribe();
        let _ = receiver.wait_for(|n| *n == 0).await;
    }

    pub async fn status(&self) -> SchedulerResult<SchedulerStatus> {
        let tasks = self.inner.store.list().await?;
        let today = DailyUsage::for_day(&tasks, self.inner.clock.now().date_naive());
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();

        Ok(SchedulerStatus {
            state: self.state(),
            in_flight: self.in_flight(),
            pending: count(TaskStatus::Pending),
            running: count(TaskStatus::Running),
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            today,
        })
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        // Lets a still-running loop exit
        self.inner.state.send_replace(SchedulerState::Stopped);
    }
}
