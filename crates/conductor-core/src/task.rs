use crate::error::{ConductorError, ConductorResult};
use crate::stage::StageOutput;
use crate::template::Template;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    InProgress,
    Complete,
    Failed,
    Aborted,
}

impl TaskStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
            TaskStatus::Aborted => "aborted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(TaskStatus::InProgress),
            "complete" => Some(TaskStatus::Complete),
            "failed" => Some(TaskStatus::Failed),
            "aborted" => Some(TaskStatus::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final structured result of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Output of the last stage of the plan.
    pub answer: serde_json::Value,
    pub template: String,
    pub template_version: u32,
    /// Every stage output in plan order.
    pub stages: Vec<StageOutput>,
}

impl TaskResponse {
    /// Packages the accumulated context of a task into its response.
    pub fn package(task: &Task) -> Self {
        let answer = task
            .context
            .last()
            .map(|o| o.content.clone())
            .unwrap_or(serde_json::Value::Null);
        Self {
            answer,
            template: task.template_name.clone(),
            template_version: task.template_version,
            stages: task.context.clone(),
        }
    }
}

/// One end-to-end processing run for a single user query.
///
/// The transition methods below are the only way a task changes; every
/// store backend applies them, so the invariants hold regardless of where
/// the task is persisted:
///
/// - `completed_stages` is a prefix of `plan`, and equals it iff the task is complete.
/// - `progress_percentage` is `100 * completed / plan.len()`, so it never decreases.
/// - once terminal, every mutation is rejected with `InvalidStateTransition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: String,
    pub query: String,
    pub template_name: String,
    pub template_version: u32,
    /// Stage list captured from the template at creation time.
    pub plan: Vec<String>,
    pub status: TaskStatus,
    pub current_stage: Option<String>,
    pub completed_stages: Vec<String>,
    pub progress_percentage: u8,
    #[serde(default)]
    pub context: Vec<StageOutput>,
    pub response: Option<TaskResponse>,
    pub error: Option<String>,
    pub abort_reason: Option<String>,
    /// Incremented on every applied mutation.
    pub revision: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>, template: &Template) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            query: query.into(),
            template_name: template.name.clone(),
            template_version: template.version,
            plan: template.stages.clone(),
            status: TaskStatus::InProgress,
            current_stage: None,
            completed_stages: Vec::new(),
            progress_percentage: 0,
            context: Vec::new(),
            response: None,
            error: None,
            abort_reason: None,
            revision: 0,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The first stage of the plan that has not completed yet.
    pub fn next_stage(&self) -> Option<&str> {
        self.plan
            .get(self.completed_stages.len())
            .map(String::as_str)
    }

    pub fn has_completed(&self, stage: &str) -> bool {
        self.completed_stages.iter().any(|s| s == stage)
    }

    fn ensure_in_progress(&self, attempted: &str) -> ConductorResult<()> {
        if self.is_terminal() {
            return Err(ConductorError::invalid_transition(
                self.id,
                self.status,
                attempted,
            ));
        }
        Ok(())
    }

    fn ensure_next(&self, stage: &str, attempted: &str) -> ConductorResult<()> {
        match self.next_stage() {
            Some(next) if next == stage => Ok(()),
            Some(next) => Err(ConductorError::invalid_transition(
                self.id,
                self.status,
                format!("{attempted} stage '{stage}' (next stage is '{next}')"),
            )),
            None => Err(ConductorError::invalid_transition(
                self.id,
                self.status,
                format!("{attempted} stage '{stage}' (plan already finished)"),
            )),
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }

    fn recompute_progress(&mut self) {
        let total = self.plan.len().max(1);
        let done = self.completed_stages.len().min(total);
        self.progress_percentage = ((done * 100) / total) as u8;
    }

    /// Marks `stage` as the stage being worked on.
    pub fn begin_stage(&mut self, stage: &str) -> ConductorResult<()> {
        self.ensure_in_progress("begin stage")?;
        self.ensure_next(stage, "begin")?;
        if self.current_stage.as_deref() != Some(stage) {
            self.current_stage = Some(stage.to_string());
            self.touch();
        }
        Ok(())
    }

    /// Records a stage success.
    ///
    /// Returns `Ok(false)` without changing anything when the stage was
    /// already recorded, so a replayed completion signal is harmless.
    ///
    /// The success of the last plan stage completes the task in the same
    /// transition: a task never holds the full plan while still in progress.
    pub fn advance(&mut self, output: StageOutput) -> ConductorResult<bool> {
        if self.has_completed(&output.stage) {
            return Ok(false);
        }
        self.ensure_in_progress("advance")?;
        self.ensure_next(&output.stage, "advance")?;

        self.completed_stages.push(output.stage.clone());
        self.context.push(output);
        self.current_stage = self.next_stage().map(str::to_string);
        if self.current_stage.is_none() {
            self.status = TaskStatus::Complete;
            self.response = Some(TaskResponse::package(self));
        }
        self.recompute_progress();
        self.touch();
        Ok(true)
    }

    /// Closes an in-progress task whose plan is already finished, such as a
    /// record imported from elsewhere. `advance` normally completes tasks itself.
    pub fn complete(&mut self, response: TaskResponse) -> ConductorResult<()> {
        self.ensure_in_progress("complete")?;
        if self.completed_stages != self.plan {
            return Err(ConductorError::invalid_transition(
                self.id,
                self.status,
                format!(
                    "complete with {}/{} stages finished",
                    self.completed_stages.len(),
                    self.plan.len()
                ),
            ));
        }
        self.status = TaskStatus::Complete;
        self.current_stage = None;
        self.response = Some(response);
        self.recompute_progress();
        self.touch();
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> ConductorResult<()> {
        self.ensure_in_progress("fail")?;
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.touch();
        Ok(())
    }

    pub fn abort(&mut self, reason: impl Into<String>) -> ConductorResult<()> {
        self.ensure_in_progress("abort")?;
        self.status = TaskStatus::Aborted;
        self.abort_reason = Some(reason.into());
        self.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateDefinition;

    fn template(stages: &[&str]) -> Template {
        Template::from_definition(TemplateDefinition::new("t", stages), 1).unwrap()
    }

    fn output(stage: &str) -> StageOutput {
        StageOutput::new(stage, serde_json::json!(format!("{stage} done")))
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("u1", "hello", &template(&["a", "b"]));
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.current_stage.is_none());
        assert!(task.completed_stages.is_empty());
        assert_eq!(task.progress_percentage, 0);
        assert_eq!(task.next_stage(), Some("a"));
    }

    #[test]
    fn test_advance_in_order_updates_progress() {
        let mut task = Task::new("u1", "q", &template(&["a", "b", "c"]));
        task.begin_stage("a").unwrap();
        assert_eq!(task.current_stage.as_deref(), Some("a"));

        assert!(task.advance(output("a")).unwrap());
        assert_eq!(task.progress_percentage, 33);
        assert_eq!(task.current_stage.as_deref(), Some("b"));

        assert!(task.advance(output("b")).unwrap());
        assert_eq!(task.progress_percentage, 66);

        assert!(task.advance(output("c")).unwrap());
        assert_eq!(task.progress_percentage, 100);
        assert!(task.current_stage.is_none());
        assert_eq!(task.context.len(), 3);
        assert_eq!(task.status, TaskStatus::Complete);
    }

    #[test]
    fn test_advance_is_idempotent() {
        let mut task = Task::new("u1", "q", &template(&["a", "b"]));
        task.advance(output("a")).unwrap();
        let revision = task.revision;

        assert!(!task.advance(output("a")).unwrap());
        assert_eq!(task.completed_stages, vec!["a".to_string()]);
        assert_eq!(task.context.len(), 1);
        assert_eq!(task.progress_percentage, 50);
        assert_eq!(task.revision, revision);
    }

    #[test]
    fn test_advance_out_of_order_rejected() {
        let mut task = Task::new("u1", "q", &template(&["a", "b"]));
        let err = task.advance(output("b")).unwrap_err();
        assert!(matches!(err, ConductorError::InvalidStateTransition { .. }));
        assert!(task.completed_stages.is_empty());

        let err = task.advance(output("zzz")).unwrap_err();
        assert!(matches!(err, ConductorError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_final_advance_completes_atomically() {
        let mut task = Task::new("u1", "q", &template(&["a", "b"]));
        task.advance(output("a")).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        let revision = task.revision;

        task.advance(output("b")).unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.revision, revision + 1);
        assert_eq!(task.completed_stages, task.plan);
        let response = task.response.as_ref().unwrap();
        assert_eq!(response.answer, serde_json::json!("b done"));
        assert_eq!(response.stages.len(), 2);

        // A replayed final signal is a no-op, not an error.
        assert!(!task.advance(output("b")).unwrap());
        assert!(task.abort("too late").is_err());
        assert_eq!(task.status, TaskStatus::Complete);
    }

    #[test]
    fn test_complete_requires_full_plan() {
        let mut task = Task::new("u1", "q", &template(&["a", "b"]));
        task.advance(output("a")).unwrap();
        let response = TaskResponse::package(&task);
        assert!(task.complete(response).is_err());
        assert_eq!(task.status, TaskStatus::InProgress);

        // A record holding the whole plan but never closed.
        task.completed_stages.push("b".to_string());
        task.context.push(output("b"));
        let response = TaskResponse::package(&task);
        task.complete(response).unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.progress_percentage, 100);
    }

    #[test]
    fn test_terminal_transitions_are_one_shot() {
        let mut task = Task::new("u1", "q", &template(&["a"]));
        task.fail("boom").unwrap();
        assert_eq!(task.error.as_deref(), Some("boom"));

        assert!(matches!(
            task.abort("late"),
            Err(ConductorError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            task.fail("again"),
            Err(ConductorError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            task.advance(output("a")),
            Err(ConductorError::InvalidStateTransition { .. })
        ));
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.abort_reason.is_none());
    }

    #[test]
    fn test_aborted_task_rejects_late_success() {
        let mut task = Task::new("u1", "q", &template(&["a", "b"]));
        task.begin_stage("a").unwrap();
        task.abort("user cancelled").unwrap();

        assert!(task.advance(output("a")).is_err());
        assert_eq!(task.status, TaskStatus::Aborted);
        assert!(task.completed_stages.is_empty());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            TaskStatus::InProgress,
            TaskStatus::Complete,
            TaskStatus::Failed,
            TaskStatus::Aborted,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("running"), None);
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Aborted.is_terminal());
    }
}
