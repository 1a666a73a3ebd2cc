//! Built-in templates seeded into a fresh registry.

use crate::registry::{SelectionPolicy, TemplateRegistry};
use conductor_core::stage::names::{
    EMBEDDING_LOOKUP, EXECUTOR_REASONING, INTENT_ANALYSIS, MODERATION, RESPONSE_PACKAGING,
    WEB_SEARCH,
};
use conductor_core::{Complexity, ConductorResult, TemplateConditions, TemplateDefinition};

/// Name of the fallback template.
pub const DEFAULT_TEMPLATE: &str = "standard_query";

// --- Template: Complex research ---

fn complex_research() -> TemplateDefinition {
    TemplateDefinition::new(
        "complex_research",
        &[
            INTENT_ANALYSIS,
            EMBEDDING_LOOKUP,
            WEB_SEARCH,
            EXECUTOR_REASONING,
            MODERATION,
            RESPONSE_PACKAGING,
        ],
    )
    .with_description("Multi-part analytical question that needs both internal knowledge and fresh web results.")
    .with_conditions(TemplateConditions {
        complexity: vec![Complexity::Complex],
        requires_live_data: Some(true),
        estimated_duration_secs: 90,
    })
}

// --- Template: Real-time query ---

fn real_time_query() -> TemplateDefinition {
    TemplateDefinition::new(
        "real_time_query",
        &[
            INTENT_ANALYSIS,
            WEB_SEARCH,
            EXECUTOR_REASONING,
            MODERATION,
            RESPONSE_PACKAGING,
        ],
    )
    .with_description("Question about current events; skips the embedding store.")
    .with_conditions(TemplateConditions {
        complexity: Vec::new(),
        requires_live_data: Some(true),
        estimated_duration_secs: 45,
    })
}

// --- Template: Quick answer ---

fn quick_answer() -> TemplateDefinition {
    TemplateDefinition::new(
        "quick_answer",
        &[EMBEDDING_LOOKUP, EXECUTOR_REASONING, RESPONSE_PACKAGING],
    )
    .with_description("Short factual lookup answered from internal knowledge.")
    .with_conditions(TemplateConditions {
        complexity: vec![Complexity::Simple],
        requires_live_data: Some(false),
        estimated_duration_secs: 10,
    })
}

// --- Template: Standard query ---

fn standard_query() -> TemplateDefinition {
    TemplateDefinition::new(
        DEFAULT_TEMPLATE,
        &[
            INTENT_ANALYSIS,
            EMBEDDING_LOOKUP,
            EXECUTOR_REASONING,
            MODERATION,
            RESPONSE_PACKAGING,
        ],
    )
    .with_description("General-purpose plan used when nothing more specific matches.")
    .with_conditions(TemplateConditions {
        complexity: Vec::new(),
        requires_live_data: None,
        estimated_duration_secs: 30,
    })
}

/// The built-in definitions in declared (priority) order.
pub fn default_templates() -> Vec<TemplateDefinition> {
    vec![
        complex_research(),
        real_time_query(),
        quick_answer(),
        standard_query(),
    ]
}

/// A registry holding the built-in templates.
pub fn default_registry(policy: SelectionPolicy) -> ConductorResult<TemplateRegistry> {
    let registry = TemplateRegistry::new(DEFAULT_TEMPLATE, policy);
    registry.sync(default_templates())?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::QueryFeatures;

    #[test]
    fn test_defaults_are_valid_and_unique() {
        let defs = default_templates();
        assert_eq!(defs.len(), 4);
        for def in &defs {
            def.validate().unwrap();
        }
        let mut names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_quick_answer_stages() {
        let reg = default_registry(SelectionPolicy::DeclaredOrder).unwrap();
        assert_eq!(
            reg.get("quick_answer").unwrap().stages,
            vec![EMBEDDING_LOOKUP, EXECUTOR_REASONING, RESPONSE_PACKAGING]
        );
        assert_eq!(reg.get(DEFAULT_TEMPLATE).unwrap().stage_count(), 5);
    }

    #[test]
    fn test_feature_routing() {
        let reg = default_registry(SelectionPolicy::DeclaredOrder).unwrap();
        let pick = |c, live| reg.select(&QueryFeatures::new(c, live)).unwrap().name.clone();

        assert_eq!(pick(Complexity::Complex, true), "complex_research");
        assert_eq!(pick(Complexity::Moderate, true), "real_time_query");
        assert_eq!(pick(Complexity::Simple, false), "quick_answer");
        assert_eq!(pick(Complexity::Moderate, false), DEFAULT_TEMPLATE);
        assert_eq!(pick(Complexity::Complex, false), DEFAULT_TEMPLATE);
    }

    #[test]
    fn test_resync_keeps_admin_changes() {
        let reg = default_registry(SelectionPolicy::DeclaredOrder).unwrap();
        reg.deactivate("quick_answer").unwrap();
        reg.register(TemplateDefinition::new(
            "oncall_lookup",
            &[EMBEDDING_LOOKUP, RESPONSE_PACKAGING],
        ))
        .unwrap();

        let changed = reg.sync(default_templates()).unwrap();
        assert!(changed.is_empty());
        assert!(!reg.get("quick_answer").unwrap().active);
        assert!(reg.get("oncall_lookup").unwrap().active);
        assert_eq!(reg.get("complex_research").unwrap().version, 1);
    }
}
