use crate::registry::SelectionPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry behaviour for a failing stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed per stage after the first attempt.
    pub retry_budget: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(exp));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }

    /// Whether another attempt is allowed after `attempt` attempts have failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.retry_budget
    }
}

/// Tunables of the orchestrator, read from the `[orchestrator]` config table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Upper bound on a single stage dispatch.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Heartbeats older than this read as unhealthy.
    #[serde(default = "default_heartbeat_staleness_secs")]
    pub heartbeat_staleness_secs: u64,
    /// Capacity of the progress broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub selection_policy: SelectionPolicy,
}

fn default_retry_budget() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_stage_timeout_secs() -> u64 {
    120
}

fn default_heartbeat_staleness_secs() -> u64 {
    60
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            stage_timeout_secs: default_stage_timeout_secs(),
            heartbeat_staleness_secs: default_heartbeat_staleness_secs(),
            event_buffer: default_event_buffer(),
            selection_policy: SelectionPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_budget: self.retry_budget,
            backoff_base_ms: self.backoff_base_ms,
            backoff_max_ms: self.backoff_max_ms,
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn heartbeat_staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_staleness_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            retry_budget: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 350,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(60), Duration::from_millis(350));
    }

    #[test]
    fn test_budget_counts_retries_not_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.retry_budget, 2);
        assert_eq!(config.stage_timeout(), Duration::from_secs(120));
        assert_eq!(config.heartbeat_staleness(), chrono::Duration::seconds(60));
        assert_eq!(config.selection_policy, SelectionPolicy::DeclaredOrder);
    }
}
