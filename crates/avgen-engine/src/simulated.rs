//! Stand-in stage workers for local runs and tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StageError;
use crate::stage::{StageAssets, StageInput, StageRegistry, StageWorker, DEFAULT_STAGES};

/// Sleeps for a fixed delay and emits one placeholder asset named after
/// the stage.
#[derive(Debug)]
pub struct SimulatedStage {
    name: String,
    delay: Duration,
    fail_with: Option<String>,
    calls: AtomicU32,
}

impl SimulatedStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            fail_with: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every call fail with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// Number of times `run` was entered.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Registry with a simulated worker for each default stage.
    pub fn registry(delay: Duration) -> StageRegistry {
        DEFAULT_STAGES.iter().fold(StageRegistry::new(), |registry, name| {
            registry.with(Arc::new(SimulatedStage::new(*name).with_delay(delay)))
        })
    }
}

#[async_trait]
impl StageWorker for SimulatedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: StageInput) -> Result<StageAssets, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(
            job_id = %input.job_id,
            stage = %self.name,
            index = input.index,
            total = input.total,
            "Running simulated stage"
        );

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(message) = &self.fail_with {
            return Err(StageError::failed(&self.name, message));
        }

        let mut assets = StageAssets::new();
        assets.insert(
            self.name.clone(),
            format!("sim://{}/{}", input.job_id, self.name),
        );
        Ok(assets)
    }
}
