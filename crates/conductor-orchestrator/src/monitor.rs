use chrono::{DateTime, Utc};
use conductor_core::{AgentHealth, AgentStatus, HealthSnapshot};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Counts of agents per effective status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub starting: usize,
    pub stopping: usize,
    pub unknown: usize,
}

/// Tracks the health record of every agent that has reported in.
///
/// Records are only written by heartbeats and lifecycle calls. Staleness is
/// applied when reading, so a silent agent reads as unhealthy without any
/// background sweeper touching the stored record.
pub struct AgentMonitor {
    records: Arc<RwLock<HashMap<String, AgentHealth>>>,
    staleness: chrono::Duration,
}

impl AgentMonitor {
    pub fn new(staleness: chrono::Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            staleness,
        }
    }

    pub fn staleness(&self) -> chrono::Duration {
        self.staleness
    }

    /// Upsert the record of `agent_id` from a heartbeat.
    pub async fn heartbeat(&self, agent_id: &str, snapshot: &HealthSnapshot) -> AgentHealth {
        self.heartbeat_at(agent_id, snapshot, Utc::now()).await
    }

    /// Same as [`heartbeat`](Self::heartbeat) with an explicit receive time.
    pub async fn heartbeat_at(
        &self,
        agent_id: &str,
        snapshot: &HealthSnapshot,
        at: DateTime<Utc>,
    ) -> AgentHealth {
        let mut records = self.records.write().await;
        let record = records
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentHealth::new(agent_id, AgentStatus::Unknown));
        record.apply(snapshot, at);
        record.clone()
    }

    /// Mark an agent as starting up.
    pub async fn register(&self, agent_id: &str) -> AgentHealth {
        let mut records = self.records.write().await;
        let record = records
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentHealth::new(agent_id, AgentStatus::Starting));
        record.status = AgentStatus::Starting;
        record.last_heartbeat = Utc::now();
        info!(agent_id = %agent_id, "Agent registered");
        record.clone()
    }

    /// Mark an agent as shutting down. Unknown agents are ignored.
    pub async fn deregister(&self, agent_id: &str) -> Option<AgentHealth> {
        let mut records = self.records.write().await;
        let record = records.get_mut(agent_id)?;
        record.status = AgentStatus::Stopping;
        info!(agent_id = %agent_id, "Agent deregistered");
        Some(record.clone())
    }

    fn effective(&self, record: &AgentHealth, now: DateTime<Utc>) -> AgentHealth {
        AgentHealth {
            status: record.effective_status(now, self.staleness),
            ..record.clone()
        }
    }

    /// The record of one agent as a reader sees it now.
    pub async fn get(&self, agent_id: &str) -> Option<AgentHealth> {
        let now = Utc::now();
        let records = self.records.read().await;
        records.get(agent_id).map(|r| self.effective(r, now))
    }

    /// Get a snapshot of all agent records, sorted by agent id.
    pub async fn snapshot(&self) -> Vec<AgentHealth> {
        self.snapshot_at(Utc::now()).await
    }

    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<AgentHealth> {
        let records = self.records.read().await;
        let mut out: Vec<AgentHealth> = records.values().map(|r| self.effective(r, now)).collect();
        out.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        out
    }

    pub async fn summary(&self) -> HealthSummary {
        let mut summary = HealthSummary::default();
        for record in self.snapshot().await {
            summary.total += 1;
            match record.status {
                AgentStatus::Healthy => summary.healthy += 1,
                AgentStatus::Unhealthy => summary.unhealthy += 1,
                AgentStatus::Starting => summary.starting += 1,
                AgentStatus::Stopping => summary.stopping += 1,
                AgentStatus::Unknown => summary.unknown += 1,
            }
        }
        summary
    }

    /// Serialize the current state as JSON (for the agents endpoint).
    pub async fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "agents": self.snapshot().await,
            "summary": self.summary().await,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new(chrono::Duration::seconds(60))
    }
}
