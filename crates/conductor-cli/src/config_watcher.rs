//! Template hot reload.
//!
//! Watches `conductor.toml` and, after a debounce window, hands the freshly
//! parsed `[[templates]]` section to a callback.

use conductor_core::{ConductorError, ConductorResult, TemplateDefinition};
use conductor_orchestrator::TemplateRegistry;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use crate::config::merge_templates;

/// The part of the config file that can change at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct ReloadableConfig {
    #[serde(default)]
    pub templates: Vec<TemplateDefinition>,
}

/// Keeps the file watch alive for as long as it is held.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `config_path`.
    ///
    /// `on_reload` runs on a background thread for every burst of writes that
    /// parses cleanly. Parse errors are logged and skipped.
    pub fn start<F>(config_path: PathBuf, debounce_ms: u64, on_reload: F) -> ConductorResult<Self>
    where
        F: Fn(ReloadableConfig) + Send + Sync + 'static,
    {
        let (tx, rx) = std_mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    let _ = tx.send(());
                }
            }
        })
        .map_err(|e| ConductorError::Config(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(config_path.as_ref(), RecursiveMode::NonRecursive)
            .map_err(|e| ConductorError::Config(format!("Failed to watch config file: {e}")))?;

        let path = config_path.clone();
        std::thread::spawn(move || {
            let debounce = std::time::Duration::from_millis(debounce_ms);
            while rx.recv().is_ok() {
                // Editors write in several steps; settle first, then reload once.
                std::thread::sleep(debounce);
                while rx.try_recv().is_ok() {}

                match parse_config(&path) {
                    Ok(config) => on_reload(config),
                    Err(e) => tracing::warn!(error = %e, "Failed to reload config"),
                }
            }
            tracing::debug!("Config watcher thread exiting");
        });

        tracing::info!(path = %config_path.display(), "Template hot-reload watcher started");
        Ok(Self { _watcher: watcher })
    }

    /// Watches `config_path` and syncs every reload into `registry`.
    pub fn for_registry(
        config_path: PathBuf,
        debounce_ms: u64,
        registry: Arc<TemplateRegistry>,
    ) -> ConductorResult<Self> {
        Self::start(config_path, debounce_ms, move |config| {
            apply_reload(&registry, config);
        })
    }
}

/// Syncs the reloaded templates into the registry, leaving it untouched on error.
pub fn apply_reload(registry: &TemplateRegistry, config: ReloadableConfig) {
    match registry.sync(merge_templates(&config.templates)) {
        Ok(changed) => {
            for template in &changed {
                tracing::info!(
                    template = %template.name,
                    version = template.version,
                    active = template.active,
                    "Template reloaded"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "Rejected template reload"),
    }
}

/// Read and parse the reloadable part of a TOML config file.
pub fn parse_config(path: &Path) -> ConductorResult<ReloadableConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConductorError::Config(format!("Failed to read config '{}': {e}", path.display()))
    })?;
    toml::from_str(&content).map_err(|e| {
        ConductorError::Config(format!("Failed to parse config '{}': {e}", path.display()))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_orchestrator::{default_registry, SelectionPolicy};
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "{body}").unwrap();
        tmp
    }

    #[test]
    fn test_parse_ignores_other_sections() {
        let tmp = write_config(
            r#"
[server]
port = 9000

[[templates]]
name = "search_only"
stages = ["web_search", "response_packaging"]
"#,
        );
        let config = parse_config(tmp.path()).unwrap();
        assert_eq!(config.templates.len(), 1);
        assert_eq!(config.templates[0].name, "search_only");
    }

    #[test]
    fn test_parse_invalid_toml_returns_error() {
        let tmp = write_config("{{{{invalid toml!!!!");
        let err = parse_config(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_parse_nonexistent_file_returns_error() {
        let err = parse_config(Path::new("/nonexistent/path/conductor.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_reload_adds_then_deactivates() {
        let registry = default_registry(SelectionPolicy::DeclaredOrder).unwrap();

        let added = parse_config(
            write_config("[[templates]]\nname = \"search_only\"\nstages = [\"web_search\"]")
                .path(),
        )
        .unwrap();
        apply_reload(&registry, added);
        assert!(registry.get("search_only").unwrap().active);
        assert_eq!(registry.get("quick_answer").unwrap().version, 1);

        apply_reload(&registry, ReloadableConfig { templates: Vec::new() });
        assert!(!registry.get("search_only").unwrap().active);
        assert!(registry.get("standard_query").unwrap().active);
    }

    #[test]
    fn test_invalid_reload_leaves_registry() {
        let registry = default_registry(SelectionPolicy::DeclaredOrder).unwrap();
        let bad = ReloadableConfig {
            templates: vec![TemplateDefinition::new("empty", &[])],
        };
        apply_reload(&registry, bad);
        assert!(registry.get("empty").is_err());
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_reload_keeps_admin_templates() {
        let registry = default_registry(SelectionPolicy::DeclaredOrder).unwrap();
        registry.deactivate("quick_answer").unwrap();
        registry
            .register(TemplateDefinition::new(
                "oncall_lookup",
                &["embedding_lookup", "response_packaging"],
            ))
            .unwrap();

        let edited = parse_config(
            write_config("[[templates]]\nname = \"search_only\"\nstages = [\"web_search\"]")
                .path(),
        )
        .unwrap();
        apply_reload(&registry, edited);

        assert!(registry.get("search_only").unwrap().active);
        assert!(!registry.get("quick_answer").unwrap().active);
        assert!(registry.get("oncall_lookup").unwrap().active);
        assert_eq!(registry.get("oncall_lookup").unwrap().version, 1);
    }
}
