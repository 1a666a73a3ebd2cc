use crate::config::RetryPolicy;
use crate::executor::{ExecutorRegistry, StageExecutor};
use crate::publisher::ProgressPublisher;
use conductor_core::{
    ConductorError, ConductorResult, FailureKind, StageAction, StageInput, StageOutput,
    StageRecord, StageResult, Task, TaskResponse, TaskStatus,
};
use conductor_store::TaskStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Cancellation signal of one task: `Some(reason)` once an abort was requested.
pub type CancelSignal = watch::Receiver<Option<String>>;

enum CallOutcome {
    Finished(StageResult),
    Cancelled(String),
}

enum StageOutcome {
    Advanced(Task),
    Finished(Task),
}

/// Walks one task through its plan.
///
/// Exactly one dispatcher loop owns a task at a time. Every attempt is
/// logged as a `start` record followed by exactly one of `complete`,
/// `retry` or `fail`.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    executors: Arc<ExecutorRegistry>,
    publisher: ProgressPublisher,
    retry: RetryPolicy,
    stage_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        executors: Arc<ExecutorRegistry>,
        publisher: ProgressPublisher,
        retry: RetryPolicy,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executors,
            publisher,
            retry,
            stage_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Runs the task to a terminal state, resuming at its first incomplete stage.
    pub async fn drive(&self, task_id: Uuid, mut cancel: CancelSignal) -> ConductorResult<Task> {
        let mut task = self.store.get(task_id).await?;
        if task.is_terminal() {
            return Ok(task);
        }
        info!(
            task_id = %task.id,
            template = %task.template_name,
            completed = task.completed_stages.len(),
            total = task.plan.len(),
            "Dispatching task"
        );
        self.publisher.publish_task_event(task.id, TaskStatus::InProgress);

        loop {
            let Some(stage) = task.next_stage().map(str::to_string) else {
                return self.finish(task).await;
            };
            if let Some(reason) = requested_abort(&cancel) {
                return self.abort(task.id, &reason).await;
            }
            match self.run_stage(task, &stage, &mut cancel).await? {
                StageOutcome::Advanced(next) => task = next,
                StageOutcome::Finished(done) => return Ok(done),
            }
        }
    }

    async fn run_stage(
        &self,
        task: Task,
        stage: &str,
        cancel: &mut CancelSignal,
    ) -> ConductorResult<StageOutcome> {
        let Some(executor) = self.executors.get(stage) else {
            let message = format!("no executor registered for stage '{stage}'");
            self.log(&task, stage, 1, StageAction::Fail, &message, serde_json::json!({
                "kind": FailureKind::Unavailable,
                "retryable": false,
            }))
            .await?;
            let error = ConductorError::StageExecution {
                stage: stage.to_string(),
                message,
            };
            return self.fail(task.id, &error.to_string()).await.map(StageOutcome::Finished);
        };

        let task = match self.store.begin_stage(task.id, stage).await {
            Ok(task) => task,
            Err(e) => return self.settle(task.id, e).await.map(StageOutcome::Finished),
        };

        let mut attempt = 1;
        loop {
            if let Some(reason) = requested_abort(cancel) {
                return self.abort(task.id, &reason).await.map(StageOutcome::Finished);
            }

            self.log(&task, stage, attempt, StageAction::Start, "", serde_json::Value::Null)
                .await?;
            let input = StageInput {
                task_id: task.id,
                stage: stage.to_string(),
                user_id: task.user_id.clone(),
                query: task.query.clone(),
                attempt,
                context: task.context.clone(),
            };

            let result = match self.call(executor.clone(), input, cancel).await {
                CallOutcome::Finished(result) => result,
                CallOutcome::Cancelled(reason) => {
                    executor.abandon(task.id, stage);
                    return self.abort(task.id, &reason).await.map(StageOutcome::Finished);
                }
            };

            match result {
                StageResult::Success { output, metadata } => {
                    let output = StageOutput::new(stage, output).with_metadata(metadata);
                    let advanced = match self.store.advance(task.id, output).await {
                        Ok(task) => task,
                        Err(e) => return self.settle(task.id, e).await.map(StageOutcome::Finished),
                    };
                    self.log(
                        &advanced,
                        stage,
                        attempt,
                        StageAction::Complete,
                        "",
                        serde_json::json!({ "progress_percentage": advanced.progress_percentage }),
                    )
                    .await?;
                    info!(
                        task_id = %advanced.id,
                        stage = %stage,
                        attempt,
                        progress = advanced.progress_percentage,
                        "Stage complete"
                    );
                    if advanced.status == TaskStatus::Complete {
                        info!(task_id = %advanced.id, template = %advanced.template_name, "Task complete");
                        self.publisher
                            .publish_task_event(advanced.id, TaskStatus::Complete);
                        return Ok(StageOutcome::Finished(advanced));
                    }
                    return Ok(StageOutcome::Advanced(advanced));
                }
                StageResult::Failure {
                    kind,
                    message,
                    retryable,
                } => {
                    let failure = serde_json::json!({ "kind": kind, "retryable": retryable });
                    if retryable && self.retry.allows_retry(attempt) {
                        let delay = self.retry.backoff(attempt);
                        warn!(
                            task_id = %task.id,
                            stage = %stage,
                            attempt,
                            kind = %kind,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Stage failed, retrying"
                        );
                        self.log(&task, stage, attempt, StageAction::Retry, &message, failure)
                            .await?;
                        if let Some(reason) = sleep_or_cancel(delay, cancel).await {
                            return self.abort(task.id, &reason).await.map(StageOutcome::Finished);
                        }
                        attempt += 1;
                        continue;
                    }

                    self.log(&task, stage, attempt, StageAction::Fail, &message, failure)
                        .await?;
                    let error = if retryable {
                        ConductorError::RetryBudgetExhausted {
                            stage: stage.to_string(),
                            attempts: attempt,
                            last_error: format!("{kind}: {message}"),
                        }
                    } else {
                        ConductorError::StageExecution {
                            stage: stage.to_string(),
                            message: format!("{kind}: {message}"),
                        }
                    };
                    return self.fail(task.id, &error.to_string()).await.map(StageOutcome::Finished);
                }
            }
        }
    }

    /// Runs one executor call on its own tokio task, bounded by the stage timeout.
    ///
    /// On cancel or timeout the join handle is dropped: the call is detached,
    /// and whatever it returns later is never looked at.
    async fn call(
        &self,
        executor: Arc<dyn StageExecutor>,
        input: StageInput,
        cancel: &mut CancelSignal,
    ) -> CallOutcome {
        let task_id = input.task_id;
        let stage = input.stage.clone();
        let worker = executor.clone();
        let handle = tokio::spawn(async move { worker.execute(input).await });

        tokio::select! {
            reason = wait_for_abort(cancel) => CallOutcome::Cancelled(reason),
            joined = tokio::time::timeout(self.stage_timeout, handle) => match joined {
                Ok(Ok(result)) => CallOutcome::Finished(result),
                Ok(Err(join_error)) => CallOutcome::Finished(StageResult::fatal(
                    FailureKind::Internal,
                    format!("executor task failed: {join_error}"),
                )),
                Err(_) => {
                    executor.abandon(task_id, &stage);
                    let timeout = ConductorError::StageTimeout {
                        stage,
                        timeout_ms: self.stage_timeout.as_millis() as u64,
                    };
                    CallOutcome::Finished(StageResult::transient(
                        FailureKind::Timeout,
                        timeout.to_string(),
                    ))
                }
            },
        }
    }

    /// Closes a task whose plan was finished without being marked complete.
    async fn finish(&self, task: Task) -> ConductorResult<Task> {
        let response = TaskResponse::package(&task);
        match self.store.complete(task.id, response).await {
            Ok(done) => {
                info!(task_id = %done.id, template = %done.template_name, "Task complete");
                self.publisher.publish_task_event(done.id, TaskStatus::Complete);
                Ok(done)
            }
            Err(e) => self.settle(task.id, e).await,
        }
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> ConductorResult<Task> {
        match self.store.fail(task_id, error).await {
            Ok(task) => {
                error!(task_id = %task_id, error = %error, "Task failed");
                self.publisher.publish_task_event(task_id, TaskStatus::Failed);
                Ok(task)
            }
            Err(e) => self.settle(task_id, e).await,
        }
    }

    async fn abort(&self, task_id: Uuid, reason: &str) -> ConductorResult<Task> {
        match self.store.abort(task_id, reason).await {
            Ok(task) => {
                info!(task_id = %task_id, reason = %reason, "Task aborted");
                self.publisher.publish_task_event(task_id, TaskStatus::Aborted);
                Ok(task)
            }
            Err(e) => self.settle(task_id, e).await,
        }
    }

    /// A rejected transition means the task went terminal elsewhere; report
    /// what the store holds. Any other error propagates.
    async fn settle(&self, task_id: Uuid, err: ConductorError) -> ConductorResult<Task> {
        match err {
            ConductorError::InvalidStateTransition { .. } => {
                let task = self.store.get(task_id).await?;
                if task.is_terminal() {
                    warn!(task_id = %task_id, status = %task.status, "Task already terminal, stopping dispatch");
                    Ok(task)
                } else {
                    Err(err)
                }
            }
            other => Err(other),
        }
    }

    async fn log(
        &self,
        task: &Task,
        stage: &str,
        attempt: u32,
        action: StageAction,
        message: &str,
        metadata: serde_json::Value,
    ) -> ConductorResult<()> {
        let record = StageRecord::new(task.id, stage, attempt, action, message)
            .with_metadata(metadata.clone());
        self.store.append_record(&record).await?;

        let mut event = match metadata {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        event.insert("attempt".to_string(), serde_json::json!(attempt));
        if !message.is_empty() {
            event.insert("message".to_string(), serde_json::json!(message));
        }
        self.publisher
            .publish_stage_event(task.id, stage, action, serde_json::Value::Object(event));
        Ok(())
    }
}

fn requested_abort(cancel: &CancelSignal) -> Option<String> {
    cancel.borrow().clone()
}

async fn wait_for_abort(cancel: &mut CancelSignal) -> String {
    loop {
        if let Some(reason) = cancel.borrow_and_update().clone() {
            return reason;
        }
        if cancel.changed().await.is_err() {
            // Sender gone: nobody can abort this task any more.
            std::future::pending::<()>().await;
        }
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &mut CancelSignal) -> Option<String> {
    tokio::select! {
        reason = wait_for_abort(cancel) => Some(reason),
        _ = tokio::time::sleep(delay) => None,
    }
}
