//! `conductor.toml` layout and loading.

use conductor_core::{ConductorError, ConductorResult, TemplateDefinition};
use conductor_orchestrator::{default_templates, OrchestratorConfig};
use conductor_store::{FileTaskStore, MemoryTaskStore, SqliteTaskStore, TaskStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct ConductorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Extra or overriding templates, merged over the built-in set by name.
    #[serde(default)]
    pub templates: Vec<TemplateDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Cap on how long a queue claim may long-poll.
    #[serde(default = "default_max_claim_wait_secs")]
    pub max_claim_wait_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_claim_wait_secs: default_max_claim_wait_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Directory for the file backend, database file for sqlite.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_max_claim_wait_secs() -> u64 {
    30
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/tasks")
}

impl ConductorConfig {
    /// Reads the config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> ConductorResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConductorError::Config(format!("Failed to read config '{}': {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConductorResult<Self> {
        toml::from_str(content)
            .map_err(|e| ConductorError::Config(format!("Failed to parse config: {e}")))
    }

    /// Built-in templates with the configured ones merged in.
    pub fn template_set(&self) -> Vec<TemplateDefinition> {
        merge_templates(&self.templates)
    }

    pub async fn open_store(&self) -> ConductorResult<Arc<dyn TaskStore>> {
        let path = &self.store.path;
        Ok(match self.store.backend {
            StoreBackend::Memory => Arc::new(MemoryTaskStore::new()),
            StoreBackend::File => Arc::new(FileTaskStore::new(path.clone()).await?),
            StoreBackend::Sqlite => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                Arc::new(SqliteTaskStore::open(path)?)
            }
        })
    }
}

/// A configured definition replaces the built-in of the same name in place;
/// new names go after the built-ins, in file order.
pub fn merge_templates(configured: &[TemplateDefinition]) -> Vec<TemplateDefinition> {
    let mut merged = default_templates();
    for def in configured {
        match merged.iter_mut().find(|d| d.name == def.name) {
            Some(slot) => *slot = def.clone(),
            None => merged.push(def.clone()),
        }
    }
    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_orchestrator::SelectionPolicy;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConductorConfig::parse("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.orchestrator.retry_budget, 2);
        assert_eq!(config.template_set().len(), 4);
    }

    #[test]
    fn test_full_config() {
        let config = ConductorConfig::parse(
            r#"
[server]
port = 8080

[store]
backend = "sqlite"
path = "/tmp/conductor.db"

[orchestrator]
retry_budget = 5
selection_policy = "most_specific"

[[templates]]
name = "quick_answer"
stages = ["embedding_lookup", "response_packaging"]

[[templates]]
name = "search_only"
stages = ["web_search", "response_packaging"]
conditions = { requires_live_data = true }
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.orchestrator.retry_budget, 5);
        assert_eq!(config.orchestrator.backoff_base_ms, 200);
        assert_eq!(
            config.orchestrator.selection_policy,
            SelectionPolicy::MostSpecific
        );

        let set = config.template_set();
        let names: Vec<&str> = set.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "complex_research",
                "real_time_query",
                "quick_answer",
                "standard_query",
                "search_only"
            ]
        );
        assert_eq!(set[2].stages.len(), 2);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = ConductorConfig::parse("[store]\nbackend = \"redis\"").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = ConductorConfig::load(Path::new("/nonexistent/conductor.toml")).unwrap();
        assert_eq!(config.server.max_claim_wait_secs, 30);
    }

    #[tokio::test]
    async fn test_open_file_store() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ConductorConfig {
            store: StoreConfig {
                backend: StoreBackend::File,
                path: tmp.path().join("tasks"),
            },
            ..Default::default()
        };
        let store = config.open_store().await.unwrap();
        assert!(store.list(None).await.unwrap().is_empty());
    }
}
