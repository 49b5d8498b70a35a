//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::health;
use crate::handlers::scheduler::{
    cleanup_tasks, create_task, get_status, get_task, list_tasks, pause_scheduler,
    resume_scheduler, start_scheduler, stop_scheduler, tick_scheduler,
};
use crate::handlers::workflows::{
    cancel_workflow, delete_workflow, execute_workflow, get_workflow, get_workflow_progress,
    list_workflows, submit_workflow,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let workflow_routes = Router::new()
        .route("/workflows", post(submit_workflow).get(list_workflows))
        .route("/workflows/:job_id", get(get_workflow).delete(delete_workflow))
        .route("/workflows/:job_id/progress", get(get_workflow_progress))
        .route("/workflows/:job_id/execute", post(execute_workflow))
        .route("/workflows/:job_id/cancel", post(cancel_workflow));

    let scheduler_routes = Router::new()
        .route("/scheduler", get(get_status))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        .route("/scheduler/pause", post(pause_scheduler))
        .route("/scheduler/resume", post(resume_scheduler))
        .route("/scheduler/tick", post(tick_scheduler))
        .route("/scheduler/cleanup", post(cleanup_tasks))
        .route("/scheduler/tasks", get(list_tasks).post(create_task))
        .route("/scheduler/tasks/:task_id", get(get_task));

    let api_routes = Router::new().merge(workflow_routes).merge(scheduler_routes);

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health))
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
