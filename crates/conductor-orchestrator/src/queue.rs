use crate::executor::StageExecutor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{FailureKind, StageInput, StageResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// One unit of stage work waiting for an external agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub work_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub input: StageInput,
}

struct PendingWork {
    task_id: Uuid,
    stage: String,
    reply: oneshot::Sender<StageResult>,
}

struct Waiters {
    notify: Arc<Notify>,
    count: usize,
}

/// Entries exist only while a stage has queued items or claimers waiting on it.
#[derive(Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<WorkItem>>,
    pending: HashMap<Uuid, PendingWork>,
    waiters: HashMap<String, Waiters>,
}

/// Holds one claimer's place on a stage; the last one out removes the entry.
struct WaitGuard<'a> {
    queue: &'a WorkQueue,
    stage: &'a str,
    notify: Arc<Notify>,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        if let Some(waiters) = state.waiters.get_mut(self.stage) {
            waiters.count -= 1;
            if waiters.count == 0 {
                state.waiters.remove(self.stage);
            }
        }
    }
}

/// Per-stage work queues that external agents pull from.
///
/// A work item stays pending from enqueue until its result is delivered or
/// the waiting dispatcher abandons it. Results for anything no longer
/// pending are reported as late.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn wait_on<'a>(&'a self, stage: &'a str) -> WaitGuard<'a> {
        let mut state = self.state.lock();
        let waiters = state
            .waiters
            .entry(stage.to_string())
            .or_insert_with(|| Waiters {
                notify: Arc::new(Notify::new()),
                count: 0,
            });
        waiters.count += 1;
        WaitGuard {
            queue: self,
            stage,
            notify: waiters.notify.clone(),
        }
    }

    /// Queues `input` and returns the receiver its result will arrive on.
    pub fn enqueue(&self, input: StageInput) -> (Uuid, oneshot::Receiver<StageResult>) {
        let (tx, rx) = oneshot::channel();
        let item = WorkItem {
            work_id: Uuid::new_v4(),
            enqueued_at: Utc::now(),
            input,
        };
        let work_id = item.work_id;
        let stage = item.input.stage.clone();
        let notify = {
            let mut state = self.state.lock();
            state.pending.insert(
                work_id,
                PendingWork {
                    task_id: item.input.task_id,
                    stage: stage.clone(),
                    reply: tx,
                },
            );
            state.queues.entry(stage.clone()).or_default().push_back(item);
            state.waiters.get(&stage).map(|w| w.notify.clone())
        };
        debug!(work_id = %work_id, stage = %stage, "Work enqueued");
        if let Some(notify) = notify {
            notify.notify_one();
        }
        (work_id, rx)
    }

    fn try_claim(&self, stage: &str) -> Option<WorkItem> {
        let mut state = self.state.lock();
        let QueueState { queues, pending, .. } = &mut *state;
        let queue = queues.get_mut(stage)?;
        let mut claimed = None;
        while let Some(item) = queue.pop_front() {
            let live = pending
                .get(&item.work_id)
                .is_some_and(|p| !p.reply.is_closed());
            if live {
                claimed = Some(item);
                break;
            }
            pending.remove(&item.work_id);
        }
        if queue.is_empty() {
            queues.remove(stage);
        }
        claimed
    }

    /// Takes the oldest live item of `stage`, waiting up to `wait` for one to arrive.
    pub async fn claim(&self, stage: &str, wait: Duration) -> Option<WorkItem> {
        let guard = self.wait_on(stage);
        let deadline = Instant::now() + wait;
        loop {
            let notified = guard.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_claim(stage) {
                info!(work_id = %item.work_id, stage = %stage, task_id = %item.input.task_id, "Work claimed");
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_claim(stage);
            }
        }
    }

    /// Delivers a result. Returns `false` when nobody is waiting for it any more.
    pub fn complete(&self, work_id: Uuid, result: StageResult) -> bool {
        let pending = self.state.lock().pending.remove(&work_id);
        match pending {
            Some(p) => {
                let delivered = p.reply.send(result).is_ok();
                if !delivered {
                    debug!(work_id = %work_id, "Result arrived after the dispatcher stopped waiting");
                }
                delivered
            }
            None => false,
        }
    }

    /// Drops every queued or claimed item of `(task_id, stage)`.
    pub fn abandon(&self, task_id: Uuid, stage: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state
            .pending
            .retain(|_, p| !(p.task_id == task_id && p.stage == stage));
        let removed = before - state.pending.len();
        if let Some(queue) = state.queues.get_mut(stage) {
            queue.retain(|item| item.input.task_id != task_id);
            if queue.is_empty() {
                state.queues.remove(stage);
            }
        }
        if removed > 0 {
            debug!(task_id = %task_id, stage = %stage, removed, "Abandoned queued work");
        }
        removed
    }

    /// Items waiting to be claimed for `stage`.
    pub fn depth(&self, stage: &str) -> usize {
        self.state.lock().queues.get(stage).map_or(0, VecDeque::len)
    }

    /// Items enqueued but without a result yet.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Stages that currently have queued items or waiting claimers.
    pub fn active_stages(&self) -> usize {
        let state = self.state.lock();
        let waiting_only = state
            .waiters
            .keys()
            .filter(|stage| !state.queues.contains_key(*stage))
            .count();
        state.queues.len() + waiting_only
    }
}

/// Executes a stage by publishing it on a [`WorkQueue`] and waiting for an
/// agent to post the result back.
pub struct QueueExecutor {
    queue: Arc<WorkQueue>,
}

impl QueueExecutor {
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl StageExecutor for QueueExecutor {
    async fn execute(&self, input: StageInput) -> StageResult {
        let (_, rx) = self.queue.enqueue(input);
        match rx.await {
            Ok(result) => result,
            Err(_) => StageResult::transient(FailureKind::Unavailable, "work item was withdrawn"),
        }
    }

    fn abandon(&self, task_id: Uuid, stage: &str) {
        self.queue.abandon(task_id, stage);
    }
}
