//! Shared request types for forge-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ModelCategory, ModelType};

/// One incoming request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingQuery {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<ModelType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_category: Option<ModelCategory>,
    pub received_at: DateTime<Utc>,
}

impl RoutingQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: format!("req-{}", uuid::Uuid::new_v4()),
            text: text.into(),
            forced_agent_id: None,
            preferred_model: None,
            temperature: None,
            model_type: None,
            model_category: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.forced_agent_id = Some(agent_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.preferred_model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_hints(mut self, model_type: Option<ModelType>, category: Option<ModelCategory>) -> Self {
        self.model_type = model_type;
        self.model_category = category;
        self
    }

    /// Forced agent id, ignoring blank values
    pub fn forced_agent(&self) -> Option<&str> {
        self.forced_agent_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_query_builder() {
        let q = RoutingQuery::new("check the permit status")
            .with_agent("construction_coordinator")
            .with_model("o3")
            .with_temperature(0.2);
        assert!(q.id.starts_with("req-"));
        assert_eq!(q.forced_agent(), Some("construction_coordinator"));
        assert_eq!(q.preferred_model.as_deref(), Some("o3"));
        assert_eq!(q.temperature, Some(0.2));
    }

    #[test]
    fn test_blank_forced_agent_ignored() {
        let q = RoutingQuery::new("hi").with_agent("  ");
        assert_eq!(q.forced_agent(), None);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(RoutingQuery::new("a").id, RoutingQuery::new("a").id);
    }
}
