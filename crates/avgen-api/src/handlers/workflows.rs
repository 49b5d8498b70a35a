//! Workflow job handlers.
//!
//! Submitting a workflow initializes the job and runs it in the
//! background; callers poll the job or its progress snapshot.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use avgen_engine::WorkflowEngine;
use avgen_models::{Job, JobId, ProgressSnapshot, WorkflowRequestDraft};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `POST /api/workflows`.
#[derive(Debug, Deserialize)]
pub struct SubmitWorkflowRequest {
    pub owner_id: String,
    #[serde(flatten)]
    pub request: WorkflowRequestDraft,
    /// Run the job right away (default true)
    #[serde(default = "default_true")]
    pub execute: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    pub owner_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelWorkflowRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

fn spawn_execute(engine: Arc<WorkflowEngine>, job_id: JobId) {
    tokio::spawn(async move {
        match engine.execute(&job_id).await {
            Ok(job) => info!(job_id = %job_id, status = %job.status, "Background execution finished"),
            Err(e) => warn!(job_id = %job_id, "Background execution failed: {}", e),
        }
    });
}

/// Create a job and start it in the background.
pub async fn submit_workflow(
    State(state): State<AppState>,
    Json(body): Json<SubmitWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let request = body
        .request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let job = state.engine.initialize(request, &body.owner_id).await?;
    info!(job_id = %job.id, owner_id = %job.owner_id, "Workflow submitted");

    if body.execute {
        spawn_execute(Arc::clone(&state.engine), job.id.clone());
    }

    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    if query.owner_id.trim().is_empty() {
        return Err(ApiError::bad_request("owner_id must not be empty"));
    }
    Ok(Json(state.engine.list(&query.owner_id).await?))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state.engine.get(&JobId::from_string(job_id)).await?;
    Ok(Json(job))
}

pub async fn get_workflow_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ProgressSnapshot>> {
    let snapshot = state.engine.progress(&JobId::from_string(job_id)).await?;
    Ok(Json(snapshot))
}

/// Run an INITIALIZED job and wait for it to finish.
pub async fn execute_workflow(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state.engine.execute(&JobId::from_string(job_id)).await?;
    Ok(Json(job))
}

pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    body: Option<Json<CancelWorkflowRequest>>,
) -> ApiResult<Json<Job>> {
    // Blank or missing reasons get the engine's default
    let reason = body.and_then(|Json(b)| b.reason).unwrap_or_default();

    let job = state
        .engine
        .cancel(&JobId::from_string(job_id), &reason)
        .await?;
    Ok(Json(job))
}

/// Remove a job and its progress. Deleting an unknown job succeeds.
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.cleanup(&JobId::from_string(job_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
