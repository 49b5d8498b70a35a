//! Axum HTTP API server.
//!
//! This crate provides:
//! - Workflow job submission, polling, cancellation and cleanup
//! - Scheduler lifecycle control and task management
//! - Request ID and logging middleware
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
