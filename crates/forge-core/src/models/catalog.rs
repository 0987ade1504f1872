//! Static model catalog and alias table

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Broad model family used as a selection hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Reasoning,
    #[default]
    Default,
}

/// Product tier used as a selection hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelCategory {
    Flagship,
    CostOptimized,
    Legacy,
    Reasoning,
}

impl std::fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flagship => write!(f, "flagship"),
            Self::CostOptimized => write!(f, "cost-optimized"),
            Self::Legacy => write!(f, "legacy"),
            Self::Reasoning => write!(f, "reasoning"),
        }
    }
}

/// A model the system may route generation to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub provider: Provider,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature_range")]
    pub temperature_range: (f32, f32),
    /// Lower is preferred
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default, rename = "type")]
    pub model_type: ModelType,
    pub category: ModelCategory,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature_range() -> (f32, f32) {
    (0.0, 1.0)
}

fn default_priority() -> u32 {
    999
}

fn default_temperature() -> f32 {
    0.7
}

impl ModelDescriptor {
    /// Whether this model declares every capability in `required`
    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required
            .iter()
            .all(|cap| self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(cap)))
    }

    /// Clamp a requested temperature into the declared range, or fall back
    /// to the model default when none was requested
    pub fn clamp_temperature(&self, requested: Option<f32>) -> f32 {
        let (min, max) = self.temperature_range;
        requested
            .unwrap_or(self.default_temperature)
            .clamp(min, max)
    }
}

/// Maps short human-facing names to canonical model names
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.aliases
            .insert(alias.into().to_lowercase(), canonical.into());
    }

    /// Resolve an alias, returning the input unchanged when it is not one
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases
            .get(&name.trim().to_lowercase())
            .map(|s| s.as_str())
            .unwrap_or(name.trim())
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Aliases pointing at `canonical`, sorted
    pub fn aliases_for(&self, canonical: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .aliases
            .iter()
            .filter(|(_, target)| target.as_str() == canonical)
            .map(|(alias, _)| alias.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// Immutable table of known models, in declaration order
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    aliases: AliasTable,
}

impl ModelCatalog {
    /// Build a catalog; aliases declared on descriptors are registered automatically
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        let mut aliases = AliasTable::new();
        for model in &models {
            if let Some(alias) = &model.alias {
                aliases.insert(alias.clone(), model.name.clone());
            }
        }
        Self { models, aliases }
    }

    /// Register an extra alias that is not declared on a descriptor
    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias, canonical);
        self
    }

    /// Add models from configuration. A model with an existing name replaces
    /// the earlier entry in place; new models are appended.
    pub fn with_models(mut self, models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        for model in models {
            if let Some(alias) = &model.alias {
                self.aliases.insert(alias.clone(), model.name.clone());
            }
            match self.models.iter_mut().find(|m| m.name == model.name) {
                Some(existing) => *existing = model,
                None => self.models.push(model),
            }
        }
        self
    }

    /// The catalog shipped with forge
    pub fn builtin() -> Self {
        let full = [
            "analysis",
            "conversation",
            "task_processing",
            "safety",
            "compliance",
            "tool_calling",
        ];
        let with_reasoning: Vec<String> = full
            .iter()
            .chain(std::iter::once(&"reasoning"))
            .map(|s| s.to_string())
            .collect();
        let standard: Vec<String> = full.iter().map(|s| s.to_string()).collect();

        Self::new(vec![
            ModelDescriptor {
                name: "claude-3-opus-20240229".to_string(),
                provider: Provider::Anthropic,
                capabilities: with_reasoning.clone(),
                max_tokens: 4096,
                temperature_range: (0.0, 1.0),
                priority: 1,
                model_type: ModelType::Reasoning,
                category: ModelCategory::Flagship,
                alias: Some("o3".to_string()),
                default_temperature: 0.7,
            },
            ModelDescriptor {
                name: "claude-3-sonnet-20240229".to_string(),
                provider: Provider::Anthropic,
                capabilities: with_reasoning,
                max_tokens: 4096,
                temperature_range: (0.0, 1.0),
                priority: 2,
                model_type: ModelType::Reasoning,
                category: ModelCategory::Reasoning,
                alias: Some("o1".to_string()),
                default_temperature: 0.7,
            },
            ModelDescriptor {
                name: "gpt-4-turbo-preview".to_string(),
                provider: Provider::OpenAi,
                capabilities: standard.clone(),
                max_tokens: 4096,
                temperature_range: (0.0, 2.0),
                priority: 3,
                model_type: ModelType::Default,
                category: ModelCategory::Flagship,
                alias: None,
                default_temperature: 0.7,
            },
            ModelDescriptor {
                name: "gpt-4o".to_string(),
                provider: Provider::OpenAi,
                capabilities: standard,
                max_tokens: 4096,
                temperature_range: (0.0, 2.0),
                priority: 4,
                model_type: ModelType::Default,
                category: ModelCategory::Flagship,
                alias: None,
                default_temperature: 0.7,
            },
            ModelDescriptor {
                name: "gpt-4o-mini".to_string(),
                provider: Provider::OpenAi,
                capabilities: vec![
                    "analysis".to_string(),
                    "conversation".to_string(),
                    "task_processing".to_string(),
                ],
                max_tokens: 4096,
                temperature_range: (0.0, 2.0),
                priority: 5,
                model_type: ModelType::Default,
                category: ModelCategory::CostOptimized,
                alias: Some("mini".to_string()),
                default_temperature: 0.7,
            },
            ModelDescriptor {
                name: "gpt-3.5-turbo".to_string(),
                provider: Provider::OpenAi,
                capabilities: vec!["conversation".to_string(), "task_processing".to_string()],
                max_tokens: 4096,
                temperature_range: (0.0, 2.0),
                priority: 6,
                model_type: ModelType::Default,
                category: ModelCategory::Legacy,
                alias: None,
                default_temperature: 0.7,
            },
        ])
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Look up a model by canonical name or alias
    pub fn resolve(&self, name: &str) -> Option<&ModelDescriptor> {
        self.get(self.aliases.resolve(name))
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_serde_and_display() {
        assert_eq!(serde_json::to_string(&Provider::OpenAi).unwrap(), "\"openai\"");
        let p: Provider = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(p, Provider::Anthropic);
        assert_eq!(Provider::OpenAi.to_string(), "openai");
        assert_eq!(Provider::from_string(" OpenAI "), Some(Provider::OpenAi));
        assert_eq!(Provider::from_string("google"), None);
    }

    #[test]
    fn test_category_serde() {
        let c: ModelCategory = serde_json::from_str("\"cost-optimized\"").unwrap();
        assert_eq!(c, ModelCategory::CostOptimized);
        assert_eq!(c.to_string(), "cost-optimized");
    }

    #[test]
    fn test_builtin_aliases_resolve() {
        let catalog = ModelCatalog::builtin();
        assert_eq!(catalog.aliases().resolve("o3"), "claude-3-opus-20240229");
        assert_eq!(catalog.aliases().resolve("O1"), "claude-3-sonnet-20240229");
        assert_eq!(catalog.aliases().resolve("gpt-4o"), "gpt-4o");
        assert_eq!(
            catalog.resolve("o3").map(|m| m.provider),
            Some(Provider::Anthropic)
        );
        assert!(catalog.resolve("nonexistent").is_none());
    }

    #[test]
    fn test_explicit_alias() {
        let catalog = ModelCatalog::builtin().with_alias("fast", "gpt-4o-mini");
        assert_eq!(catalog.resolve("fast").unwrap().name, "gpt-4o-mini");
    }

    #[test]
    fn test_has_capabilities() {
        let catalog = ModelCatalog::builtin();
        let opus = catalog.get("claude-3-opus-20240229").unwrap();
        assert!(opus.has_capabilities(&["reasoning".to_string(), "Safety".to_string()]));
        assert!(opus.has_capabilities(&[]));
        let legacy = catalog.get("gpt-3.5-turbo").unwrap();
        assert!(!legacy.has_capabilities(&["tool_calling".to_string()]));
    }

    #[test]
    fn test_clamp_temperature() {
        let catalog = ModelCatalog::builtin();
        let opus = catalog.get("claude-3-opus-20240229").unwrap();
        assert_eq!(opus.clamp_temperature(Some(1.7)), 1.0);
        assert_eq!(opus.clamp_temperature(Some(-0.5)), 0.0);
        assert_eq!(opus.clamp_temperature(None), 0.7);
        let gpt = catalog.get("gpt-4o").unwrap();
        assert_eq!(gpt.clamp_temperature(Some(1.7)), 1.7);
    }

    #[test]
    fn test_descriptor_defaults_from_toml_shape() {
        let json = serde_json::json!({
            "name": "custom",
            "provider": "openai",
            "category": "legacy"
        });
        let model: ModelDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(model.priority, 999);
        assert_eq!(model.max_tokens, 4096);
        assert_eq!(model.model_type, ModelType::Default);
        assert_eq!(model.temperature_range, (0.0, 1.0));
    }

    #[test]
    fn test_with_models_replaces_and_appends() {
        let mut local = ModelCatalog::builtin().get("gpt-4o").unwrap().clone();
        local.priority = 0;
        let mut extra = local.clone();
        extra.name = "gpt-4o-2024-08-06".to_string();
        extra.alias = Some("pinned".to_string());

        let base_len = ModelCatalog::builtin().len();
        let catalog = ModelCatalog::builtin().with_models([local, extra]);
        assert_eq!(catalog.len(), base_len + 1);
        assert_eq!(catalog.get("gpt-4o").unwrap().priority, 0);
        assert_eq!(catalog.resolve("pinned").unwrap().name, "gpt-4o-2024-08-06");
        assert_eq!(catalog.aliases().aliases_for("gpt-4o-2024-08-06"), vec!["pinned"]);
    }
}
