//! Specialist agents
//!
//! An agent is an [`AgentDescriptor`] plus something that can answer a
//! request. The [`AgentRegistry`] holds them in registration order, which is
//! also the router's tie-break order.

pub mod profile;
pub mod registry;
pub mod specialist;

pub use profile::{AgentDescriptor, contains_term, tokenize};
pub use registry::AgentRegistry;
pub use specialist::SpecialistAgent;

use async_trait::async_trait;

use crate::error::ForgeError;
use crate::models::{ModelCategory, ModelType};
use crate::stream::EventSink;
use crate::types::RoutingQuery;

/// What a specialist is asked to do
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub query: String,
    pub temperature: Option<f32>,
    pub preferred_model: Option<String>,
    pub model_type: Option<ModelType>,
    pub model_category: Option<ModelCategory>,
    /// Extra context gathered by the workflow (web results and the like)
    pub context: Option<String>,
    /// Review feedback and the draft it refers to, when revising
    pub feedback: Option<String>,
    pub previous_draft: Option<String>,
    /// Stream response text as `content` events while generating
    pub emit_content: bool,
}

impl AgentRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Carry the query's model preferences over to the agent
    pub fn for_query(query: &RoutingQuery) -> Self {
        Self {
            query: query.text.clone(),
            temperature: query.temperature,
            preferred_model: query.preferred_model.clone(),
            model_type: query.model_type,
            model_category: query.model_category,
            ..Default::default()
        }
    }

    pub fn is_revision(&self) -> bool {
        self.feedback.is_some()
    }
}

/// Anything that can answer a request on behalf of a descriptor
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Answer the request, emitting progress through `events`.
    /// Returns the full response text.
    async fn process(&self, request: AgentRequest, events: &EventSink) -> Result<String, ForgeError>;
}
