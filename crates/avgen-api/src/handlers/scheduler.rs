//! Scheduler control and task handlers.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use avgen_models::{ScheduledTask, TaskId};
use avgen_scheduler::{planned_videos, SchedulerState, SchedulerStatus, TickReport};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: SchedulerState,
}

impl From<SchedulerState> for StateResponse {
    fn from(state: SchedulerState) -> Self {
        Self { state }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    /// Defaults to the configured max age
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

/// Body of `POST /api/scheduler/tasks`.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Defaults to the scheduler's owner
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Defaults to the configured task template
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
    /// Defaults to now
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: u8,
}

pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<SchedulerStatus>> {
    Ok(Json(state.scheduler.status().await?))
}

pub async fn start_scheduler(State(state): State<AppState>) -> ApiResult<Json<StateResponse>> {
    Ok(Json(state.scheduler.start().await?.into()))
}

pub async fn stop_scheduler(State(state): State<AppState>) -> ApiResult<Json<StateResponse>> {
    Ok(Json(state.scheduler.stop().await?.into()))
}

pub async fn pause_scheduler(State(state): State<AppState>) -> ApiResult<Json<StateResponse>> {
    Ok(Json(state.scheduler.pause().await?.into()))
}

pub async fn resume_scheduler(State(state): State<AppState>) -> ApiResult<Json<StateResponse>> {
    Ok(Json(state.scheduler.resume().await?.into()))
}

/// Run one tick immediately.
pub async fn tick_scheduler(State(state): State<AppState>) -> ApiResult<Json<TickReport>> {
    Ok(Json(state.scheduler.tick().await?))
}

pub async fn cleanup_tasks(
    State(state): State<AppState>,
    body: Option<Json<CleanupRequest>>,
) -> ApiResult<Json<CleanupResponse>> {
    let max_age = body
        .and_then(|Json(b)| b.max_age_secs)
        .map(Duration::from_secs)
        .unwrap_or(state.scheduler.config().cleanup_max_age);

    let removed = state.scheduler.cleanup(max_age).await?;
    Ok(Json(CleanupResponse { removed }))
}

pub async fn list_tasks(State(state): State<AppState>) -> ApiResult<Json<Vec<ScheduledTask>>> {
    let mut tasks = state.scheduler.list_tasks().await?;
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(tasks))
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<ScheduledTask>)> {
    let scheduler_config = state.scheduler.config();

    let owner_id = body
        .owner_id
        .unwrap_or_else(|| scheduler_config.owner_id.clone());
    if owner_id.trim().is_empty() {
        return Err(ApiError::bad_request("owner_id must not be empty"));
    }

    let config = body
        .config
        .unwrap_or_else(|| scheduler_config.task_template.clone());
    let videos = planned_videos(&config);
    let scheduled_time = body.scheduled_time.unwrap_or_else(Utc::now);

    let task = ScheduledTask::new(owner_id, config, scheduled_time)
        .with_priority(body.priority)
        .with_planned_videos(videos);
    let task = state.scheduler.schedule(task).await?;

    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ScheduledTask>> {
    let task = state.scheduler.get_task(&TaskId::from(task_id)).await?;
    Ok(Json(task))
}
