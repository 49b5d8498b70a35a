//! Stage worker seam and pipeline planning.
//!
//! A stage worker turns a request (plus the assets produced so far) into
//! new named assets. The engine never inspects asset contents; it only
//! merges them into the job and tracks progress between stages.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use avgen_models::{JobId, WorkflowRequest, WorkflowType};
use serde_json::Value;

use crate::error::StageError;

/// Named assets produced by a stage (asset name -> reference).
pub type StageAssets = BTreeMap<String, String>;

/// Everything a stage worker gets to see.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub job_id: JobId,
    pub request: WorkflowRequest,
    /// Assets recorded by earlier stages
    pub prior_assets: StageAssets,
    /// 1-based position in the plan
    pub index: u32,
    pub total: u32,
}

/// One step of the generation pipeline (script, images, voice, composition...).
#[async_trait]
pub trait StageWorker: Send + Sync {
    /// Stage name this worker is registered under.
    fn name(&self) -> &str;

    /// Produce this stage's assets.
    async fn run(&self, input: StageInput) -> Result<StageAssets, StageError>;
}

/// Stage workers by name.
#[derive(Clone, Default)]
pub struct StageRegistry {
    workers: HashMap<String, Arc<dyn StageWorker>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its own name, replacing any previous one.
    pub fn register(&mut self, worker: Arc<dyn StageWorker>) {
        self.workers.insert(worker.name().to_string(), worker);
    }

    pub fn with(mut self, worker: Arc<dyn StageWorker>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StageWorker>> {
        self.workers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("workers", &self.names())
            .finish()
    }
}

pub const SCRIPT_GENERATION: &str = "script_generation";
pub const IMAGE_CREATION: &str = "image_creation";
pub const VOICE_SYNTHESIS: &str = "voice_synthesis";
pub const COMPOSITION: &str = "composition";

/// Every stage name the default plans use.
pub const DEFAULT_STAGES: &[&str] = &[SCRIPT_GENERATION, IMAGE_CREATION, VOICE_SYNTHESIS, COMPOSITION];

const QUICK_PLAN: &[&str] = &[SCRIPT_GENERATION, VOICE_SYNTHESIS, COMPOSITION];
const STANDARD_PLAN: &[&str] = &[SCRIPT_GENERATION, IMAGE_CREATION, VOICE_SYNTHESIS, COMPOSITION];

/// Chooses the ordered stage list for a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct StagePlanner;

impl StagePlanner {
    pub fn new() -> Self {
        Self
    }

    /// Ordered stage names for `request`.
    ///
    /// Custom workflows use `preferences.stages` when it is a non-empty
    /// list of strings and fall back to the standard plan otherwise.
    pub fn plan(&self, request: &WorkflowRequest) -> Vec<String> {
        match request.workflow_type() {
            WorkflowType::Quick => to_owned(QUICK_PLAN),
            WorkflowType::Standard => to_owned(STANDARD_PLAN),
            WorkflowType::Custom => {
                custom_stages(request).unwrap_or_else(|| to_owned(STANDARD_PLAN))
            }
        }
    }
}

fn to_owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn custom_stages(request: &WorkflowRequest) -> Option<Vec<String>> {
    let list = request.preferences().get("stages")?.as_array()?;
    let stages: Vec<String> = list
        .iter()
        .map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
        .collect::<Option<_>>()?;

    if stages.is_empty() {
        None
    } else {
        Some(stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn request(workflow: &str) -> WorkflowRequest {
        WorkflowRequest::parse("topic", "youtube", workflow, "medium", 60).unwrap()
    }

    fn with_stages(stages: Value) -> WorkflowRequest {
        let mut prefs = Map::new();
        prefs.insert("stages".to_string(), stages);
        request("custom").with_preferences(prefs)
    }

    #[test]
    fn test_default_plans() {
        let planner = StagePlanner::new();
        assert_eq!(planner.plan(&request("quick")).len(), 3);
        assert_eq!(
            planner.plan(&request("standard")),
            vec![SCRIPT_GENERATION, IMAGE_CREATION, VOICE_SYNTHESIS, COMPOSITION]
        );
        assert_eq!(planner.plan(&request("custom")).len(), 4);
    }

    #[test]
    fn test_custom_plan_from_preferences() {
        let planner = StagePlanner::new();
        let plan = planner.plan(&with_stages(json!(["script_generation", "composition"])));
        assert_eq!(plan, vec!["script_generation", "composition"]);
    }

    #[test]
    fn test_invalid_custom_plan_falls_back() {
        let planner = StagePlanner::new();
        assert_eq!(planner.plan(&with_stages(json!([]))).len(), 4);
        assert_eq!(planner.plan(&with_stages(json!(["a", 3]))).len(), 4);
        assert_eq!(planner.plan(&with_stages(json!("composition"))).len(), 4);
    }

    struct Named(&'static str);

    #[async_trait]
    impl StageWorker for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _input: StageInput) -> Result<StageAssets, StageError> {
            Ok(StageAssets::new())
        }
    }

    #[test]
    fn test_registry() {
        let registry = StageRegistry::new()
            .with(Arc::new(Named("b")))
            .with(Arc::new(Named("a")));
        assert!(registry.contains("a"));
        assert!(registry.get("c").is_none());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
