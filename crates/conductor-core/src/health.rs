use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Reported (or derived) liveness of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Healthy,
    Unhealthy,
    Starting,
    Stopping,
    Unknown,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Healthy => write!(f, "healthy"),
            AgentStatus::Unhealthy => write!(f, "unhealthy"),
            AgentStatus::Starting => write!(f, "starting"),
            AgentStatus::Stopping => write!(f, "stopping"),
            AgentStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Payload an agent pushes on every heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Defaults to healthy when the agent does not say otherwise.
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub queue_size: u64,
    #[serde(default)]
    pub processed_tasks: u64,
    #[serde(default)]
    pub failed_tasks: u64,
}

/// The single live health record of one agent identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: String,
    /// Status as last stored; see [`AgentHealth::effective_status`] for reads.
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub queue_size: u64,
    pub processed_tasks: u64,
    pub failed_tasks: u64,
}

impl AgentHealth {
    pub fn new(agent_id: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            agent_id: agent_id.into(),
            status,
            last_heartbeat: Utc::now(),
            cpu_usage: 0.0,
            memory_usage: 0.0,
            queue_size: 0,
            processed_tasks: 0,
            failed_tasks: 0,
        }
    }

    /// Overwrites the record with a fresh heartbeat received at `at`.
    pub fn apply(&mut self, snapshot: &HealthSnapshot, at: DateTime<Utc>) {
        self.status = snapshot.status.unwrap_or(AgentStatus::Healthy);
        self.last_heartbeat = at;
        self.cpu_usage = snapshot.cpu_usage;
        self.memory_usage = snapshot.memory_usage;
        self.queue_size = snapshot.queue_size;
        self.processed_tasks = snapshot.processed_tasks;
        self.failed_tasks = snapshot.failed_tasks;
    }

    pub fn is_stale(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        now - self.last_heartbeat > staleness
    }

    /// Status as seen by a reader at `now`: a stale heartbeat reads as unhealthy.
    pub fn effective_status(&self, now: DateTime<Utc>, staleness: Duration) -> AgentStatus {
        if self.is_stale(now, staleness) {
            AgentStatus::Unhealthy
        } else {
            self.status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_defaults_to_healthy() {
        let mut health = AgentHealth::new("embedder-1", AgentStatus::Starting);
        let now = Utc::now();
        health.apply(
            &HealthSnapshot {
                queue_size: 4,
                processed_tasks: 10,
                ..Default::default()
            },
            now,
        );
        assert_eq!(health.status, AgentStatus::Healthy);
        assert_eq!(health.queue_size, 4);
        assert_eq!(health.processed_tasks, 10);
        assert_eq!(health.last_heartbeat, now);
    }

    #[test]
    fn test_stale_heartbeat_reads_unhealthy() {
        let mut health = AgentHealth::new("search-1", AgentStatus::Healthy);
        let window = Duration::seconds(60);
        let beat = Utc::now();
        health.apply(&HealthSnapshot::default(), beat);

        assert_eq!(
            health.effective_status(beat + Duration::seconds(59), window),
            AgentStatus::Healthy
        );
        assert_eq!(
            health.effective_status(beat + Duration::seconds(61), window),
            AgentStatus::Unhealthy
        );
        // The stored field is untouched by a read.
        assert_eq!(health.status, AgentStatus::Healthy);
    }

    #[test]
    fn test_reported_status_is_kept_when_fresh() {
        let mut health = AgentHealth::new("mod-1", AgentStatus::Unknown);
        let now = Utc::now();
        health.apply(
            &HealthSnapshot {
                status: Some(AgentStatus::Stopping),
                ..Default::default()
            },
            now,
        );
        assert_eq!(
            health.effective_status(now, Duration::seconds(60)),
            AgentStatus::Stopping
        );
    }
}
