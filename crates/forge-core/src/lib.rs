//! forge-core - routing and orchestration for specialist LLM agents
//!
//! This crate provides:
//! - Agent registry and confidence-scored routing
//! - Model catalog with capability/priority selection and a guaranteed fallback
//! - A manager workflow: analysis, delegation, web search, synthesis and a bounded review loop
//! - One ordered event stream per request with a single terminal `done`
//! - Reference OpenAI, Anthropic and SerpApi backends

pub mod agents;
pub mod analysis;
pub mod documents;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod review;
pub mod router;
pub mod search;
pub mod stream;
pub mod types;
pub mod workflow;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use agents::{Agent, AgentDescriptor, AgentRegistry, AgentRequest, SpecialistAgent};
pub use analysis::{AnalysisConfig, QueryAnalysis, QueryAnalyzer};
pub use documents::{Document, DocumentStore};
pub use error::ForgeError;
pub use models::{
    BackendPool, ModelBackend, ModelCatalog, ModelDescriptor, ModelRequirements, ModelSelector,
    Provider, ResolvedModel,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use review::{ReviewChecklist, ReviewConfig};
pub use router::{AgentRouter, RouterConfig, ScoreNormalization};
pub use search::{SearchBackend, SearchConfig, WebSearcher};
pub use stream::{DoneReason, EventKind, EventStream, StreamEvent};
pub use types::RoutingQuery;
pub use workflow::{ManagerWorkflow, WorkflowConfig, WorkflowStep};
