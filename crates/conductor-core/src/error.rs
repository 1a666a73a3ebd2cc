use crate::task::TaskStatus;
use thiserror::Error;
use uuid::Uuid;

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Top-level error type for the Conductor orchestrator.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// No template with the given name, and no usable default to fall back to.
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// A template definition failed validation.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// No task with the given id exists in the store.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// A mutation was attempted that the task's current state does not allow.
    #[error("Invalid state transition for task {task_id}: cannot {attempted} while {from}")]
    InvalidStateTransition {
        /// The task that rejected the mutation.
        task_id: Uuid,
        /// Status of the task when the mutation was attempted.
        from: TaskStatus,
        /// Short description of the rejected mutation.
        attempted: String,
    },

    /// A stage did not answer within its bounded wait.
    #[error("Stage '{stage}' timed out after {timeout_ms}ms")]
    StageTimeout {
        /// Stage name.
        stage: String,
        /// The wait that was exceeded.
        timeout_ms: u64,
    },

    /// An executor reported a failure for a stage.
    #[error("Stage '{stage}' failed: {message}")]
    StageExecution {
        /// Stage name.
        stage: String,
        /// Failure reported by the executor.
        message: String,
    },

    /// A stage kept failing until its retry budget ran out.
    #[error("Stage '{stage}' failed after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        /// Stage name.
        stage: String,
        /// Total attempts made, including the first.
        attempts: u32,
        /// The failure reported by the final attempt.
        last_error: String,
    },

    /// The task was aborted by an external request.
    #[error("Task {0} was cancelled")]
    Cancelled(Uuid),

    /// A task store backend failed.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the HTTP/WebSocket gateway layer.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Builds an [`ConductorError::InvalidStateTransition`].
    pub fn invalid_transition(task_id: Uuid, from: TaskStatus, attempted: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            task_id,
            from,
            attempted: attempted.into(),
        }
    }

    /// Whether the error describes a missing entity (task or template).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TaskNotFound(_) | Self::TemplateNotFound(_))
    }
}
