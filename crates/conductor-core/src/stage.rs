use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known stage names used by the default templates.
pub mod names {
    /// Classifies what the user is asking for.
    pub const INTENT_ANALYSIS: &str = "intent_analysis";
    /// Looks up related documents in the vector store.
    pub const EMBEDDING_LOOKUP: &str = "embedding_lookup";
    /// Fetches fresh information from the web.
    pub const WEB_SEARCH: &str = "web_search";
    /// Produces the answer from the gathered context.
    pub const EXECUTOR_REASONING: &str = "executor_reasoning";
    /// Screens the draft answer.
    pub const MODERATION: &str = "moderation";
    /// Shapes the final answer for the caller.
    pub const RESPONSE_PACKAGING: &str = "response_packaging";
}

/// The unit of work handed to a stage executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInput {
    pub task_id: Uuid,
    pub stage: String,
    pub user_id: String,
    pub query: String,
    /// 1-based attempt counter; retries re-send the same input with a higher attempt.
    pub attempt: u32,
    /// Outputs of every stage completed so far, in plan order.
    #[serde(default)]
    pub context: Vec<StageOutput>,
}

impl StageInput {
    /// Output of a previously completed stage, if any.
    pub fn output_of(&self, stage: &str) -> Option<&StageOutput> {
        self.context.iter().find(|o| o.stage == stage)
    }
}

/// Output of a completed stage, carried forward in the task context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: String,
    pub content: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl StageOutput {
    pub fn new(stage: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            stage: stage.into(),
            content,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Category of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The executor rejected its input; retrying the same input cannot help.
    MalformedInput,
    /// The stage did not answer within its bounded wait.
    Timeout,
    /// No executor is available for the stage.
    Unavailable,
    /// The content was refused (e.g. by moderation).
    Rejected,
    /// Anything else the executor reports.
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::MalformedInput => write!(f, "malformed_input"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Unavailable => write!(f, "unavailable"),
            FailureKind::Rejected => write!(f, "rejected"),
            FailureKind::Internal => write!(f, "internal"),
        }
    }
}

/// The only shape the dispatcher inspects from an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageResult {
    Success {
        output: serde_json::Value,
        #[serde(default)]
        metadata: serde_json::Value,
    },
    Failure {
        kind: FailureKind,
        message: String,
        retryable: bool,
    },
}

impl StageResult {
    pub fn success(output: serde_json::Value) -> Self {
        StageResult::Success {
            output,
            metadata: serde_json::Value::Null,
        }
    }

    /// A failure the dispatcher may retry.
    pub fn transient(kind: FailureKind, message: impl Into<String>) -> Self {
        StageResult::Failure {
            kind,
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that ends the task immediately.
    pub fn fatal(kind: FailureKind, message: impl Into<String>) -> Self {
        StageResult::Failure {
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }
}

/// What happened to a stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageAction {
    Start,
    Complete,
    Fail,
    Retry,
}

impl std::fmt::Display for StageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageAction::Start => write!(f, "start"),
            StageAction::Complete => write!(f, "complete"),
            StageAction::Fail => write!(f, "fail"),
            StageAction::Retry => write!(f, "retry"),
        }
    }
}

/// One entry of a task's append-only stage execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub stage: String,
    pub attempt: u32,
    pub action: StageAction,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl StageRecord {
    pub fn new(
        task_id: Uuid,
        stage: impl Into<String>,
        attempt: u32,
        action: StageAction,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            stage: stage.into(),
            attempt,
            action,
            message: message.into(),
            metadata: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
