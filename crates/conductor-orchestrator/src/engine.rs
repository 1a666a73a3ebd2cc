use crate::config::OrchestratorConfig;
use crate::dispatcher::Dispatcher;
use crate::executor::ExecutorRegistry;
use crate::monitor::AgentMonitor;
use crate::publisher::ProgressPublisher;
use crate::registry::TemplateRegistry;
use crate::selector::PlanSelector;
use conductor_core::{
    ConductorError, ConductorResult, QueryFeatures, StageRecord, Task, TaskStatus, Template,
};
use conductor_store::TaskStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

struct TaskHandle {
    cancel: watch::Sender<Option<String>>,
    done: watch::Receiver<bool>,
}

/// The stage orchestrator.
/// Implements the select → create → dispatch pattern, one dispatcher loop per task.
pub struct Orchestrator {
    selector: PlanSelector,
    store: Arc<dyn TaskStore>,
    executors: Arc<ExecutorRegistry>,
    dispatcher: Arc<Dispatcher>,
    publisher: ProgressPublisher,
    running: Arc<Mutex<HashMap<Uuid, TaskHandle>>>,
}

impl Orchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        registry: Arc<TemplateRegistry>,
        executors: Arc<ExecutorRegistry>,
        store: Arc<dyn TaskStore>,
    ) -> ConductorResult<Self> {
        let monitor = Arc::new(AgentMonitor::new(config.heartbeat_staleness()));
        let publisher = ProgressPublisher::new(config.event_buffer, monitor);
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            executors.clone(),
            publisher.clone(),
            config.retry_policy(),
            config.stage_timeout(),
        ));
        Ok(Self {
            selector: PlanSelector::new(registry)?,
            store,
            executors,
            dispatcher,
            publisher,
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        self.selector.registry()
    }

    pub fn executors(&self) -> &Arc<ExecutorRegistry> {
        &self.executors
    }

    pub fn publisher(&self) -> &ProgressPublisher {
        &self.publisher
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        self.publisher.monitor()
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Dry run of plan selection.
    pub fn choose_plan(
        &self,
        query: &str,
        user_id: &str,
    ) -> ConductorResult<(Arc<Template>, QueryFeatures)> {
        self.selector.choose_plan(query, user_id)
    }

    /// Creates a task for `query` and starts dispatching it in the background.
    pub async fn submit(&self, user_id: &str, query: &str) -> ConductorResult<Task> {
        let (template, _) = self.selector.choose_plan(query, user_id)?;
        let missing = self.executors.missing(&template.stages);
        if !missing.is_empty() {
            warn!(template = %template.name, missing = ?missing, "Template has stages without executors");
        }
        let task = self.store.create(user_id, query, &template).await?;
        info!(task_id = %task.id, user_id = %user_id, template = %task.template_name, "Task submitted");
        self.spawn(task.id);
        Ok(task)
    }

    /// Starts a dispatcher loop for `task_id` unless one is already running.
    fn spawn(&self, task_id: Uuid) -> bool {
        let (cancel_tx, cancel_rx) = watch::channel(None);
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut running = self.running.lock();
            if running.contains_key(&task_id) {
                return false;
            }
            running.insert(
                task_id,
                TaskHandle {
                    cancel: cancel_tx,
                    done: done_rx,
                },
            );
        }

        let dispatcher = self.dispatcher.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            match dispatcher.drive(task_id, cancel_rx).await {
                Ok(task) => info!(task_id = %task_id, status = %task.status, "Dispatcher finished"),
                Err(e) => error!(task_id = %task_id, error = %e, "Dispatcher stopped on store error"),
            }
            running.lock().remove(&task_id);
            let _ = done_tx.send(true);
        });
        true
    }

    pub async fn get(&self, task_id: Uuid) -> ConductorResult<Task> {
        self.store.get(task_id).await
    }

    pub async fn list(&self, status: Option<TaskStatus>) -> ConductorResult<Vec<Task>> {
        self.store.list(status).await
    }

    pub async fn stage_log(&self, task_id: Uuid) -> ConductorResult<Vec<StageRecord>> {
        // Surface TaskNotFound instead of an empty log for unknown ids.
        self.store.get(task_id).await?;
        self.store.stage_log(task_id).await
    }

    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.running.lock().contains_key(&task_id)
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Requests cancellation and returns the task once its dispatcher has stopped.
    ///
    /// A task without a live dispatcher is aborted directly in the store.
    /// Either way, a task that ends in any status other than aborted fails
    /// with `InvalidStateTransition`.
    pub async fn abort(&self, task_id: Uuid, reason: &str) -> ConductorResult<Task> {
        let signalled = {
            let running = self.running.lock();
            match running.get(&task_id) {
                Some(handle) => {
                    handle.cancel.send_replace(Some(reason.to_string()));
                    true
                }
                None => false,
            }
        };
        if signalled {
            info!(task_id = %task_id, reason = %reason, "Abort requested");
            let task = self.wait(task_id).await?;
            if task.status != TaskStatus::Aborted {
                // The dispatcher reached another terminal state before it saw the signal.
                return Err(ConductorError::invalid_transition(task_id, task.status, "abort"));
            }
            return Ok(task);
        }

        let task = self.store.abort(task_id, reason).await?;
        self.publisher.publish_task_event(task_id, TaskStatus::Aborted);
        info!(task_id = %task_id, reason = %reason, "Task aborted without a running dispatcher");
        Ok(task)
    }

    /// Waits for the task's dispatcher to stop, then returns the stored task.
    pub async fn wait(&self, task_id: Uuid) -> ConductorResult<Task> {
        let done = self.running.lock().get(&task_id).map(|h| h.done.clone());
        if let Some(mut done) = done {
            // An error only means the loop ended without flagging; the store has the answer either way.
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.store.get(task_id).await
    }

    /// Restarts dispatch for every task the store still holds as in progress.
    pub async fn recover(&self) -> ConductorResult<Vec<Uuid>> {
        let pending = self.store.list(Some(TaskStatus::InProgress)).await?;
        let mut resumed = Vec::new();
        for task in pending {
            if self.spawn(task.id) {
                info!(
                    task_id = %task.id,
                    completed = task.completed_stages.len(),
                    total = task.plan.len(),
                    "Resuming task"
                );
                resumed.push(task.id);
            }
        }
        Ok(resumed)
    }
}
