//! Agent descriptor: identity, routing vocabulary and model requirements

use serde::{Deserialize, Serialize};

use crate::error::ForgeError;

/// Describes one specialist. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Task types in declaration order; underscores also match as spaces
    #[serde(default)]
    pub task_types: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub expertise: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_max_complexity")]
    pub max_complexity: u8,
    #[serde(default)]
    pub preferred_model: Option<String>,
    /// If non-empty, at least one must appear in a query for this agent to score
    #[serde(default)]
    pub domain_terms: Vec<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default = "default_model_capabilities")]
    pub model_capabilities: Vec<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_max_complexity() -> u8 {
    10
}

fn default_model_capabilities() -> Vec<String> {
    vec!["conversation".to_string()]
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: String::new(),
            task_types: Vec::new(),
            keywords: Vec::new(),
            expertise: Vec::new(),
            capabilities: Vec::new(),
            max_complexity: default_max_complexity(),
            preferred_model: None,
            domain_terms: Vec::new(),
            instructions: String::new(),
            model_capabilities: default_model_capabilities(),
            temperature: None,
        }
    }

    pub fn validate(&self) -> Result<(), ForgeError> {
        if self.id.trim().is_empty() {
            return Err(ForgeError::Registry(format!(
                "agent '{}' has an empty id",
                self.display_name
            )));
        }
        if self.id != self.id.trim() {
            return Err(ForgeError::Registry(format!(
                "agent id '{}' has surrounding whitespace",
                self.id
            )));
        }
        Ok(())
    }

    /// Union of task types and keywords, lowercased, deduplicated in first-seen order
    pub fn routing_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for term in self.task_types.iter().chain(self.keywords.iter()) {
            let term = term.trim().to_lowercase();
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }

    /// Whether a tokenized query passes the domain gate
    pub fn passes_domain_gate(&self, tokens: &[String]) -> bool {
        self.domain_terms.is_empty() || self.domain_terms.iter().any(|t| contains_term(tokens, t))
    }

    /// Names a caller might use to refer to this agent
    pub fn name_variants(&self) -> Vec<String> {
        let display = self.display_name.trim().to_lowercase();
        let candidates = [
            self.id.to_lowercase(),
            self.id.to_lowercase().replace('_', " "),
            display.replace(' ', "_"),
            display,
        ];
        let mut variants: Vec<String> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !variants.contains(&candidate) {
                variants.push(candidate);
            }
        }
        variants
    }
}

/// Case-folded word tokens. Anything that is not a letter or digit separates words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `term` occurs in `tokens` as whole words.
/// Multi-word terms (`safety_audit`, `follow-up`) must appear as consecutive tokens.
pub fn contains_term(tokens: &[String], term: &str) -> bool {
    let words = tokenize(term);
    !words.is_empty() && tokens.windows(words.len()).any(|w| w == words.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn safety() -> AgentDescriptor {
        let mut d = AgentDescriptor::new("safety_auditor", "Safety Auditor");
        d.task_types = vec!["safety_audit".to_string(), "Inspection".to_string()];
        d.keywords = vec!["inspection".to_string(), "hazard".to_string()];
        d
    }

    #[test]
    fn test_new_defaults() {
        let d = AgentDescriptor::new("general", "General Assistant");
        assert_eq!(d.model_capabilities, vec!["conversation".to_string()]);
        assert_eq!(d.max_complexity, 10);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_empty_id_rejected() {
        let d = AgentDescriptor::new("  ", "Ghost");
        assert!(matches!(d.validate(), Err(ForgeError::Registry(_))));
    }

    #[test]
    fn test_routing_terms_dedup_case_insensitive() {
        assert_eq!(
            safety().routing_terms(),
            vec!["safety_audit", "inspection", "hazard"]
        );
    }

    #[test]
    fn test_domain_gate() {
        let mut d = safety();
        assert!(d.passes_domain_gate(&tokenize("anything")));
        d.domain_terms = vec!["Site".to_string(), "permit".to_string()];
        assert!(d.passes_domain_gate(&tokenize("Is the SITE ready?")));
        assert!(!d.passes_domain_gate(&tokenize("hazard report")));
        assert!(!d.passes_domain_gate(&tokenize("which website has the permits")));
    }

    #[test]
    fn test_tokenize_and_contains_term() {
        let tokens = tokenize("Schedule the safety-audit, then the follow-up (site B)!");
        assert_eq!(
            tokens,
            vec!["schedule", "the", "safety", "audit", "then", "the", "follow", "up", "site", "b"]
        );
        assert!(contains_term(&tokens, "safety_audit"));
        assert!(contains_term(&tokens, "Follow-Up"));
        assert!(contains_term(&tokens, "site"));
        assert!(!contains_term(&tokens, "audit_safety"));
        assert!(!contains_term(&tokens, "sched"));
        assert!(!contains_term(&tokens, "  "));
        assert!(!contains_term(&[], "site"));
    }

    #[test]
    fn test_name_variants() {
        let variants = safety().name_variants();
        assert_eq!(variants, vec!["safety_auditor", "safety auditor"]);
    }

    #[test]
    fn test_deserialize_with_name_alias() {
        let toml_like = serde_json::json!({
            "id": "meeting_writer",
            "name": "Meeting Writer",
            "keywords": ["minutes", "agenda"]
        });
        let d: AgentDescriptor = serde_json::from_value(toml_like).unwrap();
        assert_eq!(d.display_name, "Meeting Writer");
        assert_eq!(d.keywords.len(), 2);
        assert_eq!(d.model_capabilities, vec!["conversation".to_string()]);
    }
}
