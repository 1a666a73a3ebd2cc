use crate::error::{ConductorError, ConductorResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Coarse complexity class derived from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Moderate => write!(f, "moderate"),
            Complexity::Complex => write!(f, "complex"),
        }
    }
}

/// Typed feature vector a template predicate is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFeatures {
    pub complexity: Complexity,
    pub needs_live_data: bool,
    pub word_count: usize,
    pub question_count: usize,
}

impl QueryFeatures {
    pub fn new(complexity: Complexity, needs_live_data: bool) -> Self {
        Self {
            complexity,
            needs_live_data,
            word_count: 0,
            question_count: 0,
        }
    }
}

/// Selection predicate of a template.
///
/// An empty `complexity` list and a `None` live-data requirement match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConditions {
    #[serde(default)]
    pub complexity: Vec<Complexity>,
    #[serde(default)]
    pub requires_live_data: Option<bool>,
    #[serde(default)]
    pub estimated_duration_secs: u64,
}

impl TemplateConditions {
    pub fn matches(&self, features: &QueryFeatures) -> bool {
        let complexity_ok =
            self.complexity.is_empty() || self.complexity.contains(&features.complexity);
        let live_ok = self
            .requires_live_data
            .map_or(true, |required| required == features.needs_live_data);
        complexity_ok && live_ok
    }

    /// Number of constrained dimensions; higher is more specific.
    pub fn specificity(&self) -> u8 {
        let mut score = 0;
        if !self.complexity.is_empty() {
            score += 1;
        }
        if self.requires_live_data.is_some() {
            score += 1;
        }
        score
    }
}

/// A template as submitted for registration (config file or admin API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub stages: Vec<String>,
    #[serde(default)]
    pub conditions: TemplateConditions,
}

impl TemplateDefinition {
    pub fn new(name: impl Into<String>, stages: &[&str]) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            stages: stages.iter().map(|s| (*s).to_string()).collect(),
            conditions: TemplateConditions::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_conditions(mut self, conditions: TemplateConditions) -> Self {
        self.conditions = conditions;
        self
    }

    /// Rejects empty names, empty stage lists and repeated stages.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConductorError::InvalidTemplate(
                "template name must not be empty".to_string(),
            ));
        }
        if self.stages.is_empty() {
            return Err(ConductorError::InvalidTemplate(format!(
                "template '{}' has no stages",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.trim().is_empty() {
                return Err(ConductorError::InvalidTemplate(format!(
                    "template '{}' contains an empty stage name",
                    self.name
                )));
            }
            if !seen.insert(stage.as_str()) {
                return Err(ConductorError::InvalidTemplate(format!(
                    "template '{}' lists stage '{}' more than once",
                    self.name, stage
                )));
            }
        }
        Ok(())
    }
}

/// An immutable, versioned DAG template.
///
/// Stages run strictly in the listed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub version: u32,
    pub description: String,
    pub stages: Vec<String>,
    pub conditions: TemplateConditions,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Template {
    /// Builds a validated template at the given version.
    pub fn from_definition(definition: TemplateDefinition, version: u32) -> ConductorResult<Self> {
        definition.validate()?;
        Ok(Self {
            name: definition.name,
            version,
            description: definition.description,
            stages: definition.stages,
            conditions: definition.conditions,
            active: true,
            created_at: Utc::now(),
        })
    }

    pub fn matches(&self, features: &QueryFeatures) -> bool {
        self.active && self.conditions.matches(features)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// A copy of this definition with `active` cleared.
    pub fn deactivated(&self) -> Self {
        Self {
            active: false,
            ..self.clone()
        }
    }
}
