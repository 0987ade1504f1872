//! Model selection: strict preferred model, then graceful degrade to best-available

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::catalog::{ModelCatalog, ModelCategory, ModelDescriptor, ModelType, Provider};
use crate::error::ForgeError;

/// Catalog-independent model used when nothing in the catalog qualifies
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_PROVIDER: Provider = Provider::OpenAi;
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// What a caller needs from a model
#[derive(Debug, Clone, Default)]
pub struct ModelRequirements {
    pub capabilities: Vec<String>,
    pub preferred_model: Option<String>,
    pub model_type: Option<ModelType>,
    pub model_category: Option<ModelCategory>,
    pub temperature: Option<f32>,
}

impl ModelRequirements {
    pub fn new<S: AsRef<str>>(capabilities: &[S]) -> Self {
        Self {
            capabilities: capabilities.iter().map(|c| c.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_preferred(mut self, model: Option<String>) -> Self {
        self.preferred_model = model;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_hints(mut self, model_type: Option<ModelType>, category: Option<ModelCategory>) -> Self {
        self.model_type = model_type;
        self.model_category = category;
        self
    }

    fn hints_match(&self, model: &ModelDescriptor) -> bool {
        self.model_type.is_none_or(|t| model.model_type == t)
            && self.model_category.is_none_or(|c| model.category == c)
    }
}

/// How a model was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPath {
    /// The caller's preferred model qualified
    Preferred,
    /// Best priority among models matching every constraint
    Ranked,
    /// Type/category hints were dropped to find a candidate
    Widened,
    /// Nothing qualified; the fixed default was used
    Default,
}

/// The concrete model a call will be made against
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedModel {
    pub name: String,
    pub provider: Provider,
    pub max_tokens: u32,
    pub temperature: f32,
    pub path: SelectionPath,
}

impl ResolvedModel {
    fn from_descriptor(model: &ModelDescriptor, temperature: Option<f32>, path: SelectionPath) -> Self {
        Self {
            name: model.name.clone(),
            provider: model.provider,
            max_tokens: model.max_tokens,
            temperature: model.clamp_temperature(temperature),
            path,
        }
    }

    /// The fixed fallback model
    pub fn fallback(temperature: Option<f32>) -> Self {
        let (min, max) = DEFAULT_TEMPERATURE_RANGE;
        Self {
            name: DEFAULT_MODEL.to_string(),
            provider: DEFAULT_PROVIDER,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: temperature.unwrap_or(DEFAULT_TEMPERATURE).clamp(min, max),
            path: SelectionPath::Default,
        }
    }
}

/// Picks a model from the catalog, constrained to providers with credentials.
///
/// Read-only after construction; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    catalog: Arc<ModelCatalog>,
    available: HashSet<Provider>,
}

impl ModelSelector {
    pub fn new(catalog: Arc<ModelCatalog>, available: impl IntoIterator<Item = Provider>) -> Self {
        let available: HashSet<Provider> = available.into_iter().collect();
        info!(
            "ModelSelector: {} models, credentialed providers: {:?}",
            catalog.len(),
            available
        );
        Self { catalog, available }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn is_available(&self, provider: Provider) -> bool {
        self.available.contains(&provider)
    }

    /// Select a model, falling back to the fixed default rather than failing
    pub fn select(&self, req: &ModelRequirements) -> ResolvedModel {
        match self.try_select(req) {
            Ok(model) => model,
            Err(e) => {
                warn!("ModelSelector: {}; using default model {}", e, DEFAULT_MODEL);
                ResolvedModel::fallback(req.temperature)
            }
        }
    }

    /// Select a model, reporting `ModelUnavailable` when nothing qualifies
    pub fn try_select(&self, req: &ModelRequirements) -> Result<ResolvedModel, ForgeError> {
        if let Some(preferred) = self.preferred(req) {
            return Ok(preferred);
        }

        let credentialed: Vec<&ModelDescriptor> = self
            .catalog
            .iter()
            .filter(|m| self.is_available(m.provider) && m.has_capabilities(&req.capabilities))
            .collect();

        let strict: Vec<&ModelDescriptor> = credentialed
            .iter()
            .copied()
            .filter(|m| req.hints_match(m))
            .collect();

        let (mut candidates, path) = if strict.is_empty() {
            (credentialed, SelectionPath::Widened)
        } else {
            (strict, SelectionPath::Ranked)
        };

        // Stable sort keeps catalog order among equal priorities
        candidates.sort_by_key(|m| m.priority);

        match candidates.first() {
            Some(model) => {
                let resolved = ResolvedModel::from_descriptor(model, req.temperature, path);
                debug!(
                    "ModelSelector: selected {} ({}) via {:?}",
                    resolved.name, resolved.provider, path
                );
                Ok(resolved)
            }
            None => Err(ForgeError::ModelUnavailable {
                capabilities: req.capabilities.clone(),
            }),
        }
    }

    fn preferred(&self, req: &ModelRequirements) -> Option<ResolvedModel> {
        let name = req.preferred_model.as_deref()?;
        let Some(model) = self.catalog.resolve(name) else {
            debug!("ModelSelector: preferred model '{}' is not in the catalog", name);
            return None;
        };
        if !self.is_available(model.provider) {
            debug!(
                "ModelSelector: preferred model '{}' skipped, no {} credential",
                model.name, model.provider
            );
            return None;
        }
        if !model.has_capabilities(&req.capabilities) || !req.hints_match(model) {
            debug!(
                "ModelSelector: preferred model '{}' does not meet requirements",
                model.name
            );
            return None;
        }
        Some(ResolvedModel::from_descriptor(
            model,
            req.temperature,
            SelectionPath::Preferred,
        ))
    }
}
