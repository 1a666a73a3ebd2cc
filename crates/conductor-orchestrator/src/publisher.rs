use crate::monitor::AgentMonitor;
use chrono::{DateTime, Utc};
use conductor_core::{AgentHealth, AgentStatus, HealthSnapshot, StageAction, TaskStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// An event on the progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Stage {
        task_id: Uuid,
        stage: String,
        action: StageAction,
        #[serde(default)]
        metadata: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Task {
        task_id: Uuid,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        agent_id: String,
        status: AgentStatus,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    /// The task this event belongs to, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            ProgressEvent::Stage { task_id, .. } | ProgressEvent::Task { task_id, .. } => {
                Some(*task_id)
            }
            ProgressEvent::Heartbeat { .. } => None,
        }
    }
}

/// Fan-out of stage transitions, task transitions and heartbeats.
///
/// Delivery is at-most-once. Publishing never waits on subscribers: with
/// nobody listening the event is dropped, and a lagging subscriber loses
/// the oldest events instead of slowing the dispatcher down.
#[derive(Clone)]
pub struct ProgressPublisher {
    tx: broadcast::Sender<ProgressEvent>,
    monitor: Arc<AgentMonitor>,
}

impl ProgressPublisher {
    pub fn new(capacity: usize, monitor: Arc<AgentMonitor>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, monitor }
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("Progress event dropped, no subscribers");
        }
    }

    pub fn publish_stage_event(
        &self,
        task_id: Uuid,
        stage: &str,
        action: StageAction,
        metadata: serde_json::Value,
    ) {
        self.send(ProgressEvent::Stage {
            task_id,
            stage: stage.to_string(),
            action,
            metadata,
            timestamp: Utc::now(),
        });
    }

    pub fn publish_task_event(&self, task_id: Uuid, status: TaskStatus) {
        self.send(ProgressEvent::Task {
            task_id,
            status,
            timestamp: Utc::now(),
        });
    }

    /// Records the heartbeat and announces it.
    pub async fn publish_heartbeat(&self, agent_id: &str, snapshot: &HealthSnapshot) -> AgentHealth {
        let record = self.monitor.heartbeat(agent_id, snapshot).await;
        self.send(ProgressEvent::Heartbeat {
            agent_id: record.agent_id.clone(),
            status: record.status,
            timestamp: record.last_heartbeat,
        });
        record
    }
}
