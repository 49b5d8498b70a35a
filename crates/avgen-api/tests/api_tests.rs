//! HTTP API integration tests.

use std::sync::Arc;
use std::time::Duration;

use avgen_api::{create_router, ApiConfig, AppState};
use avgen_engine::{EngineConfig, SimulatedStage, WorkflowEngine};
use avgen_scheduler::{InMemoryTaskStore, SchedulerConfig, TaskScheduler, WorkflowTaskRunner};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio_test::assert_ok;
use tower::ServiceExt;

fn test_state() -> AppState {
    let engine = Arc::new(WorkflowEngine::in_memory(
        SimulatedStage::registry(Duration::ZERO),
        &EngineConfig::default(),
    ));
    let scheduler_config = SchedulerConfig {
        enabled: false,
        retry_delay: Duration::from_millis(5),
        ..Default::default()
    };
    let runner = Arc::new(WorkflowTaskRunner::new(
        engine.clone(),
        scheduler_config.cost_per_api_call,
    ));
    let scheduler = Arc::new(TaskScheduler::new(
        scheduler_config,
        Arc::new(InMemoryTaskStore::new()),
        runner,
    ));
    AppState::new(ApiConfig::default(), engine, scheduler)
}

fn app() -> (Router, AppState) {
    let state = test_state();
    (create_router(state.clone(), None), state)
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = assert_ok!(app.clone().oneshot(req).await);
    let status = response.status();
    let bytes = assert_ok!(axum::body::to_bytes(response.into_body(), usize::MAX).await);
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        assert_ok!(serde_json::from_slice(&bytes))
    };
    (status, body)
}

fn workflow_body(owner: &str, execute: bool) -> Value {
    json!({
        "owner_id": owner,
        "topic": "Rust ownership in 60 seconds",
        "target_platform": "youtube",
        "workflow_type": "standard",
        "quality_level": "high",
        "expected_duration": 60,
        "execute": execute
    })
}

async fn wait_for_status(app: &Router, job_id: &str, status: &str) -> Value {
    for _ in 0..200 {
        let (_, job) = send(app, request(Method::GET, &format!("/api/workflows/{}", job_id), None)).await;
        if job["status"] == status {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {}", job_id, status);
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let (status, body) = send(&app, request(Method::GET, "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["scheduler"], "stopped");
}

#[tokio::test]
async fn test_submit_runs_job_to_completion() {
    let (app, _) = app();

    let (status, job) = send(
        &app,
        request(Method::POST, "/api/workflows", Some(workflow_body("alice", true))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["owner_id"], "alice");
    let job_id = job["id"].as_str().unwrap().to_string();

    let job = wait_for_status(&app, &job_id, "completed").await;
    assert_eq!(job["progress"], 100);
    assert_eq!(job["completed_stages"], 4);
    assert_eq!(job["generated_assets"].as_object().unwrap().len(), 4);

    let (status, progress) = send(
        &app,
        request(Method::GET, &format!("/api/workflows/{}/progress", job_id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["progress"], 100);

    let (status, jobs) = send(&app, request(Method::GET, "/api/workflows?owner_id=alice", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_request_is_rejected() {
    let (app, _) = app();
    let mut body = workflow_body("alice", true);
    body["target_platform"] = json!("myspace");

    let (status, error) = send(&app, request(Method::POST, "/api/workflows", Some(body))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["detail"].as_str().unwrap().contains("target_platform"));

    let (status, _) = send(
        &app,
        request(Method::POST, "/api/workflows", Some(workflow_body("  ", true))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (app, _) = app();
    for (method, uri) in [
        (Method::GET, "/api/workflows/missing"),
        (Method::GET, "/api/workflows/missing/progress"),
        (Method::POST, "/api/workflows/missing/cancel"),
        (Method::POST, "/api/workflows/missing/execute"),
    ] {
        let (status, body) = send(&app, request(method, uri, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert!(body["detail"].is_string());
    }
}

#[tokio::test]
async fn test_cancel_then_execute_conflicts() {
    let (app, _) = app();
    let (_, job) = send(
        &app,
        request(Method::POST, "/api/workflows", Some(workflow_body("bob", false))),
    )
    .await;
    assert_eq!(job["status"], "initialized");
    let job_id = job["id"].as_str().unwrap().to_string();

    let (status, job) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/workflows/{}/cancel", job_id),
            Some(json!({"reason": "topic withdrawn"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "cancelled");
    assert_eq!(job["error"], "topic withdrawn");

    let cancel_uri = format!("/api/workflows/{}/cancel", job_id);
    let (status, _) = send(&app, request(Method::POST, &cancel_uri, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let execute_uri = format!("/api/workflows/{}/execute", job_id);
    let (status, _) = send(&app, request(Method::POST, &execute_uri, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_execute_endpoint_waits_for_result() {
    let (app, _) = app();
    let (_, job) = send(
        &app,
        request(Method::POST, "/api/workflows", Some(workflow_body("carol", false))),
    )
    .await;
    let job_id = job["id"].as_str().unwrap().to_string();

    let (status, job) = send(
        &app,
        request(Method::POST, &format!("/api/workflows/{}/execute", job_id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "completed");
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (app, _) = app();
    let (_, job) = send(
        &app,
        request(Method::POST, "/api/workflows", Some(workflow_body("dave", false))),
    )
    .await;
    let uri = format!("/api/workflows/{}", job["id"].as_str().unwrap());

    let (status, _) = send(&app, request(Method::DELETE, &uri, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, request(Method::GET, &uri, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, request(Method::DELETE, &uri, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_list_requires_owner() {
    let (app, _) = app();
    let (status, _) = send(&app, request(Method::GET, "/api/workflows", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_scheduler_lifecycle() {
    let (app, _) = app();

    let (status, body) = send(&app, request(Method::POST, "/api/scheduler/pause", None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("pause"));

    let (status, body) = send(&app, request(Method::POST, "/api/scheduler/start", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");

    let (_, body) = send(&app, request(Method::POST, "/api/scheduler/pause", None)).await;
    assert_eq!(body["state"], "paused");
    let (_, body) = send(&app, request(Method::POST, "/api/scheduler/resume", None)).await;
    assert_eq!(body["state"], "running");

    let (_, body) = send(&app, request(Method::GET, "/api/scheduler", None)).await;
    assert_eq!(body["state"], "running");

    let (_, body) = send(&app, request(Method::POST, "/api/scheduler/stop", None)).await;
    assert_eq!(body["state"], "stopped");
}

#[tokio::test]
async fn test_disabled_tick_is_declined() {
    let (app, _) = app();
    let (status, body) = send(&app, request(Method::POST, "/api/scheduler/tick", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "declined");
    assert_eq!(body["dispatched"], 0);
}

#[tokio::test]
async fn test_task_created_and_run_by_tick() {
    let (app, state) = app();

    let (status, task) = send(
        &app,
        request(Method::POST, "/api/scheduler/tasks", Some(json!({"priority": 2}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["status"], "pending");
    assert_eq!(task["owner_id"], "scheduler");
    let uri = format!("/api/scheduler/tasks/{}", task["task_id"].as_str().unwrap());

    let (_, body) = send(&app, request(Method::POST, "/api/scheduler/tick", None)).await;
    assert_eq!(body["dispatched"], 1);
    tokio::time::timeout(Duration::from_secs(5), state.scheduler.wait_idle())
        .await
        .expect("scheduler did not go idle");

    let (status, task) = send(&app, request(Method::GET, &uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "completed");
    assert_eq!(task["metrics"]["videos_generated"], 1);

    let (_, tasks) = send(&app, request(Method::GET, "/api/scheduler/tasks", None)).await;
    assert_eq!(tasks.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, request(Method::GET, "/api/scheduler/tasks/missing", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, request(Method::POST, "/api/scheduler/cleanup", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 0);

    let (_, body) = send(
        &app,
        request(Method::POST, "/api/scheduler/cleanup", Some(json!({"max_age_secs": 0}))),
    )
    .await;
    assert_eq!(body["removed"], 1);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let (app, _) = app();
    let req = Request::builder()
        .uri("/health")
        .header("X-Request-ID", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = assert_ok!(app.oneshot(req).await);
    assert_eq!(response.headers()["X-Request-ID"], "req-42");
}
