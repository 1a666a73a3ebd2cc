use async_trait::async_trait;
use conductor_core::{StageInput, StageResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// An agent that performs one kind of stage.
///
/// Executors are opaque to the dispatcher: it only looks at the returned
/// [`StageResult`]. Errors are reported as `StageResult::Failure`, never panics.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, input: StageInput) -> StageResult;

    /// Called when the dispatcher stops waiting for `(task_id, stage)`,
    /// after a timeout or an abort. The in-flight call itself keeps running.
    fn abandon(&self, _task_id: Uuid, _stage: &str) {}
}

/// Resolves stage names to executors.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StageExecutor>>,
    fallback: Option<Arc<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
            fallback: None,
        }
    }

    pub fn register(&mut self, stage: impl Into<String>, executor: Arc<dyn StageExecutor>) {
        let stage = stage.into();
        info!(stage = %stage, "Registered stage executor");
        self.executors.insert(stage, executor);
    }

    /// Executor used for every stage without a dedicated one.
    pub fn set_fallback(&mut self, executor: Arc<dyn StageExecutor>) {
        self.fallback = Some(executor);
    }

    pub fn get(&self, stage: &str) -> Option<Arc<dyn StageExecutor>> {
        self.executors
            .get(stage)
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// Stages of `plan` that no executor can serve.
    pub fn missing<'a>(&self, plan: &'a [String]) -> Vec<&'a str> {
        plan.iter()
            .map(String::as_str)
            .filter(|s| self.get(s).is_none())
            .collect()
    }

    pub fn stages(&self) -> Vec<String> {
        let mut stages: Vec<String> = self.executors.keys().cloned().collect();
        stages.sort();
        stages
    }

    pub fn executor_count(&self) -> usize {
        self.executors.len()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
