use crate::registry::TemplateRegistry;
use conductor_core::{Complexity, ConductorError, ConductorResult, QueryFeatures, Template};
use regex::Regex;
use std::sync::Arc;
use tracing::info;

const ANALYTICAL_TERMS: &str = r"(?i)\b(analy[sz]e|analysis|compare|comparison|contrast|evaluate|assess|implications?|trade-?offs?|pros and cons|impact|investigate|explain why|relationship between|root cause)\b";
const LIVE_DATA_TERMS: &str = r"(?i)\b(today|tonight|latest|current(ly)?|now|recent(ly)?|news|this (week|month|year)|yesterday|live|breaking|up[- ]to[- ]date|right now)\b";

/// Queries at or under this many words may be simple.
const SIMPLE_MAX_WORDS: usize = 12;
/// Queries over this many words are complex.
const COMPLEX_MIN_WORDS: usize = 40;

/// Turns a raw query into features and picks its template.
pub struct PlanSelector {
    registry: Arc<TemplateRegistry>,
    analytical: Regex,
    live_data: Regex,
}

impl PlanSelector {
    pub fn new(registry: Arc<TemplateRegistry>) -> ConductorResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ConductorError::Config(format!("bad selector pattern: {e}")))
        };
        Ok(Self {
            registry,
            analytical: compile(ANALYTICAL_TERMS)?,
            live_data: compile(LIVE_DATA_TERMS)?,
        })
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    /// Extracts the typed feature vector of a query.
    pub fn features(&self, query: &str) -> QueryFeatures {
        let word_count = query.split_whitespace().count();
        let question_count = query.matches('?').count();
        let analytical_hits = self.analytical.find_iter(query).count();

        let complexity = if word_count > COMPLEX_MIN_WORDS
            || analytical_hits >= 2
            || question_count >= 2
        {
            Complexity::Complex
        } else if word_count <= SIMPLE_MAX_WORDS && analytical_hits == 0 {
            Complexity::Simple
        } else {
            Complexity::Moderate
        };

        QueryFeatures {
            complexity,
            needs_live_data: self.live_data.is_match(query),
            word_count,
            question_count,
        }
    }

    /// Picks the template for a query. Only a missing default template is an error.
    pub fn choose_plan(
        &self,
        query: &str,
        user_id: &str,
    ) -> ConductorResult<(Arc<Template>, QueryFeatures)> {
        let features = self.features(query);
        let template = self.registry.select(&features)?;
        info!(
            user_id = %user_id,
            template = %template.name,
            version = template.version,
            complexity = %features.complexity,
            needs_live_data = features.needs_live_data,
            "Plan selected"
        );
        Ok((template, features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SelectionPolicy;
    use crate::templates::default_registry;

    fn selector() -> PlanSelector {
        PlanSelector::new(Arc::new(default_registry(SelectionPolicy::DeclaredOrder).unwrap())).unwrap()
    }

    #[test]
    fn test_short_lookup_is_quick_answer() {
        let s = selector();
        let (template, features) = s.choose_plan("What is the SRE wiki URL?", "alice").unwrap();
        assert_eq!(features.complexity, Complexity::Simple);
        assert!(!features.needs_live_data);
        assert_eq!(features.word_count, 5);
        assert_eq!(features.question_count, 1);
        assert_eq!(template.name, "quick_answer");
    }

    #[test]
    fn test_live_terms_route_to_real_time() {
        let s = selector();
        let (template, features) = s
            .choose_plan("What is the latest status of the payments outage?", "bob")
            .unwrap();
        assert!(features.needs_live_data);
        assert_eq!(template.name, "real_time_query");
    }

    #[test]
    fn test_complex_live_query() {
        let s = selector();
        let (template, features) = s
            .choose_plan(
                "Compare today's incident with last month's outage and assess the impact on our SLOs?",
                "carol",
            )
            .unwrap();
        assert_eq!(features.complexity, Complexity::Complex);
        assert!(features.needs_live_data);
        assert_eq!(template.name, "complex_research");
    }

    #[test]
    fn test_moderate_query_uses_default() {
        let s = selector();
        let (template, features) = s
            .choose_plan(
                "How do I rotate the credentials used by the deployment pipeline for staging clusters?",
                "dave",
            )
            .unwrap();
        assert_eq!(features.complexity, Complexity::Moderate);
        assert_eq!(template.name, "standard_query");
    }

    #[test]
    fn test_multiple_questions_are_complex() {
        let s = selector();
        let f = s.features("Who owns billing? Who owns search?");
        assert_eq!(f.question_count, 2);
        assert_eq!(f.complexity, Complexity::Complex);
    }

    #[test]
    fn test_live_match_is_word_bounded() {
        let s = selector();
        assert!(!s.features("Why is the nowhere-cache flag documented?").needs_live_data);
        assert!(!s.features("Explain the currency conversion module").needs_live_data);
        assert!(s.features("What changed right now?").needs_live_data);
    }
}
