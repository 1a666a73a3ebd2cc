use async_trait::async_trait;
use conductor_core::{
    ConductorResult, StageOutput, StageRecord, Task, TaskResponse, TaskStatus, Template,
};
use uuid::Uuid;

/// A single guarded change to a task.
///
/// Backends apply mutations atomically: load the task, run
/// [`TaskMutation::apply`], and persist only when it reports a change.
#[derive(Debug, Clone)]
pub enum TaskMutation {
    BeginStage(String),
    Advance(StageOutput),
    Complete(TaskResponse),
    Fail(String),
    Abort(String),
}

impl TaskMutation {
    /// Applies the mutation, returning whether the task changed.
    pub fn apply(self, task: &mut Task) -> ConductorResult<bool> {
        let before = task.revision;
        match self {
            TaskMutation::BeginStage(stage) => task.begin_stage(&stage)?,
            TaskMutation::Advance(output) => {
                task.advance(output)?;
            }
            TaskMutation::Complete(response) => task.complete(response)?,
            TaskMutation::Fail(error) => task.fail(error)?,
            TaskMutation::Abort(reason) => task.abort(reason)?,
        }
        Ok(task.revision != before)
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            TaskMutation::BeginStage(_) => "begin_stage",
            TaskMutation::Advance(_) => "advance",
            TaskMutation::Complete(_) => "complete",
            TaskMutation::Fail(_) => "fail",
            TaskMutation::Abort(_) => "abort",
        }
    }
}

/// Durable record of every task and its stage log.
///
/// The store is the single source of truth for recovery. Mutations on a
/// terminal task fail with `InvalidStateTransition`, which also rejects any
/// stale writer that races the owning dispatcher.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persists a freshly built task. Fails if the id already exists.
    async fn insert(&self, task: &Task) -> ConductorResult<()>;

    /// Loads a task or fails with `TaskNotFound`.
    async fn get(&self, id: Uuid) -> ConductorResult<Task>;

    /// All tasks, oldest first, optionally filtered by status.
    async fn list(&self, status: Option<TaskStatus>) -> ConductorResult<Vec<Task>>;

    /// Atomically applies `mutation` and returns the resulting task.
    async fn mutate(&self, id: Uuid, mutation: TaskMutation) -> ConductorResult<Task>;

    /// Appends to the task's stage log. Records are never rewritten.
    async fn append_record(&self, record: &StageRecord) -> ConductorResult<()>;

    /// The task's stage log in append order.
    async fn stage_log(&self, id: Uuid) -> ConductorResult<Vec<StageRecord>>;

    /// Creates an `in_progress` task running `template`.
    async fn create(
        &self,
        user_id: &str,
        query: &str,
        template: &Template,
    ) -> ConductorResult<Task> {
        let task = Task::new(user_id, query, template);
        self.insert(&task).await?;
        Ok(task)
    }

    async fn begin_stage(&self, id: Uuid, stage: &str) -> ConductorResult<Task> {
        self.mutate(id, TaskMutation::BeginStage(stage.to_string()))
            .await
    }

    /// Idempotent on `(id, output.stage)`.
    async fn advance(&self, id: Uuid, output: StageOutput) -> ConductorResult<Task> {
        self.mutate(id, TaskMutation::Advance(output)).await
    }

    async fn complete(&self, id: Uuid, response: TaskResponse) -> ConductorResult<Task> {
        self.mutate(id, TaskMutation::Complete(response)).await
    }

    async fn fail(&self, id: Uuid, error: &str) -> ConductorResult<Task> {
        self.mutate(id, TaskMutation::Fail(error.to_string())).await
    }

    async fn abort(&self, id: Uuid, reason: &str) -> ConductorResult<Task> {
        self.mutate(id, TaskMutation::Abort(reason.to_string())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::TemplateDefinition;

    #[test]
    fn test_apply_reports_change() {
        let template =
            Template::from_definition(TemplateDefinition::new("t", &["a", "b"]), 1).unwrap();
        let mut task = Task::new("u", "q", &template);

        let changed = TaskMutation::Advance(StageOutput::new("a", serde_json::json!(1)))
            .apply(&mut task)
            .unwrap();
        assert!(changed);

        let replay = TaskMutation::Advance(StageOutput::new("a", serde_json::json!(1)))
            .apply(&mut task)
            .unwrap();
        assert!(!replay);
    }

    #[test]
    fn test_begin_same_stage_twice_is_unchanged() {
        let template = Template::from_definition(TemplateDefinition::new("t", &["a"]), 1).unwrap();
        let mut task = Task::new("u", "q", &template);
        assert!(TaskMutation::BeginStage("a".into()).apply(&mut task).unwrap());
        assert!(!TaskMutation::BeginStage("a".into()).apply(&mut task).unwrap());
    }

    #[test]
    fn test_mutation_names() {
        assert_eq!(TaskMutation::Abort("x".into()).name(), "abort");
        assert_eq!(TaskMutation::Fail("x".into()).name(), "fail");
    }
}
