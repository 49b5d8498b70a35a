//! Application state.

use std::sync::Arc;

use avgen_engine::{EngineConfig, SimulatedStage, Stores, WorkflowEngine};
use avgen_scheduler::{InMemoryTaskStore, SchedulerConfig, TaskScheduler, WorkflowTaskRunner};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub engine: Arc<WorkflowEngine>,
    pub scheduler: Arc<TaskScheduler>,
}

impl AppState {
    pub fn new(config: ApiConfig, engine: Arc<WorkflowEngine>, scheduler: Arc<TaskScheduler>) -> Self {
        Self {
            config,
            engine,
            scheduler,
        }
    }

    /// Build the engine and scheduler from their configs.
    ///
    /// Stage workers are simulated; the scheduler runs tasks through the
    /// same engine the HTTP handlers use.
    pub async fn build(
        config: ApiConfig,
        engine_config: EngineConfig,
        scheduler_config: SchedulerConfig,
    ) -> anyhow::Result<Self> {
        let stores = Stores::from_config(&engine_config).await?;
        let registry = SimulatedStage::registry(config.simulated_stage_delay);
        let engine = Arc::new(WorkflowEngine::new(
            stores.repository,
            stores.tracker,
            registry,
            &engine_config,
        ));

        let runner = Arc::new(WorkflowTaskRunner::new(
            Arc::clone(&engine),
            scheduler_config.cost_per_api_call,
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            scheduler_config,
            Arc::new(InMemoryTaskStore::new()),
            runner,
        ));

        Ok(Self::new(config, engine, scheduler))
    }
}
