use conductor_core::{ConductorError, ConductorResult, QueryFeatures, Template, TemplateDefinition};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// How `select` breaks ties between several matching templates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// First active match in declared order.
    #[default]
    DeclaredOrder,
    /// Match with the most constrained conditions; declared order breaks ties.
    MostSpecific,
}

/// Named, versioned DAG templates in declared order.
///
/// Read-mostly: selection takes a read lock and clones an `Arc`, so callers
/// keep the exact definition they were handed even if the name is redefined.
///
/// Templates come from two places. `sync` installs the configured set;
/// `register` and `deactivate` are runtime admin changes. A name touched by an
/// admin change belongs to the admin from then on and `sync` leaves it alone.
pub struct TemplateRegistry {
    /// Lock order: `admin_managed` before `templates`.
    admin_managed: RwLock<HashSet<String>>,
    templates: RwLock<Vec<Arc<Template>>>,
    default_name: String,
    policy: SelectionPolicy,
}

impl TemplateRegistry {
    pub fn new(default_name: impl Into<String>, policy: SelectionPolicy) -> Self {
        Self {
            admin_managed: RwLock::new(HashSet::new()),
            templates: RwLock::new(Vec::new()),
            default_name: default_name.into(),
            policy,
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Registers a template, bumping the version when the name already exists.
    ///
    /// A redefined template keeps its declared position and is active again.
    /// The name is admin-managed afterwards.
    pub fn register(&self, definition: TemplateDefinition) -> ConductorResult<Arc<Template>> {
        let mut admin_managed = self.admin_managed.write();
        let template = self.install(definition)?;
        admin_managed.insert(template.name.clone());
        Ok(template)
    }

    /// Whether `name` was last changed at runtime rather than by `sync`.
    pub fn is_admin_managed(&self, name: &str) -> bool {
        self.admin_managed.read().contains(name)
    }

    fn install(&self, definition: TemplateDefinition) -> ConductorResult<Arc<Template>> {
        definition.validate()?;
        let mut templates = self.templates.write();
        let existing = templates.iter().position(|t| t.name == definition.name);
        let version = existing.map_or(1, |i| templates[i].version + 1);
        let template = Arc::new(Template::from_definition(definition, version)?);
        match existing {
            Some(i) => templates[i] = template.clone(),
            None => templates.push(template.clone()),
        }
        info!(template = %template.name, version = template.version, "Template registered");
        Ok(template)
    }

    /// Looks a template up by name, active or not.
    pub fn get(&self, name: &str) -> ConductorResult<Arc<Template>> {
        self.templates
            .read()
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| ConductorError::TemplateNotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<Arc<Template>> {
        self.templates.read().clone()
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }

    /// Removes a template from selection. The default template cannot be deactivated.
    ///
    /// The name is admin-managed afterwards, so a config reload does not revive it.
    pub fn deactivate(&self, name: &str) -> ConductorResult<Arc<Template>> {
        let mut admin_managed = self.admin_managed.write();
        let template = self.retire(name)?;
        admin_managed.insert(template.name.clone());
        Ok(template)
    }

    fn retire(&self, name: &str) -> ConductorResult<Arc<Template>> {
        if name == self.default_name {
            return Err(ConductorError::InvalidTemplate(format!(
                "cannot deactivate the default template '{name}'"
            )));
        }
        let mut templates = self.templates.write();
        let slot = templates
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| ConductorError::TemplateNotFound(name.to_string()))?;
        if slot.active {
            *slot = Arc::new(slot.deactivated());
            info!(template = %name, "Template deactivated");
        }
        Ok(slot.clone())
    }

    /// Picks the template for `features`, falling back to the default template.
    pub fn select(&self, features: &QueryFeatures) -> ConductorResult<Arc<Template>> {
        let templates = self.templates.read();
        let mut candidates = templates.iter().filter(|t| t.matches(features));
        let chosen = match self.policy {
            SelectionPolicy::DeclaredOrder => candidates.next(),
            // max_by_key keeps the last maximum; rev() turns that into the first declared.
            SelectionPolicy::MostSpecific => candidates
                .rev()
                .max_by_key(|t| t.conditions.specificity()),
        };
        if let Some(template) = chosen {
            return Ok(template.clone());
        }

        templates
            .iter()
            .find(|t| t.name == self.default_name && t.active)
            .cloned()
            .ok_or_else(|| ConductorError::TemplateNotFound(self.default_name.clone()))
    }

    /// Replaces the configured definition set, keeping the default present.
    ///
    /// Unchanged definitions keep their version; configured names that disappear
    /// are deactivated. Admin-managed names are skipped in both directions.
    pub fn sync(&self, definitions: Vec<TemplateDefinition>) -> ConductorResult<Vec<Arc<Template>>> {
        for def in &definitions {
            def.validate()?;
        }
        let admin_managed = self.admin_managed.read();
        let mut changed = Vec::new();
        for def in &definitions {
            if admin_managed.contains(&def.name) {
                continue;
            }
            let unchanged = self.get(&def.name).ok().is_some_and(|current| {
                current.active
                    && current.stages == def.stages
                    && current.conditions == def.conditions
                    && current.description == def.description
            });
            if !unchanged {
                changed.push(self.install(def.clone())?);
            }
        }
        let names: Vec<String> = self.list().iter().map(|t| t.name.clone()).collect();
        for name in names {
            if name != self.default_name
                && !admin_managed.contains(&name)
                && !definitions.iter().any(|d| d.name == name)
                && self.get(&name).is_ok_and(|t| t.active)
            {
                changed.push(self.retire(&name)?);
            }
        }
        Ok(changed)
    }
}
