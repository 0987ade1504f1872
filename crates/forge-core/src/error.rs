//! Error taxonomy for routing, selection and the manager workflow

use thiserror::Error;

use crate::models::Provider;
use crate::workflow::WorkflowStep;

/// Errors surfaced by the forge core.
///
/// Only `AgentNotFound` on a forced route is fatal before a stream starts.
/// The rest are absorbed at the smallest scope that produced them.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// A forced or explicit agent id could not be resolved
    #[error("Agent '{0}' not found")]
    AgentNotFound(String),

    /// No credentialed model satisfies the requested constraints
    #[error("No available model satisfies capabilities [{}]", .capabilities.join(", "))]
    ModelUnavailable { capabilities: Vec<String> },

    /// A model backend call failed or returned an error chunk
    #[error("{provider} API error: {message}")]
    UpstreamApi { provider: Provider, message: String },

    /// A response failed the review checklist
    #[error("Response failed review: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A single web search lookup failed
    #[error("Search for '{query}' failed: {message}")]
    Search { query: String, message: String },

    /// The workflow attempted a transition the state machine does not allow
    #[error("Invalid workflow transition {from} -> {to}")]
    InvalidTransition { from: WorkflowStep, to: WorkflowStep },

    /// Registry construction rejected a descriptor
    #[error("Registry error: {0}")]
    Registry(String),

    /// The request was cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,
}

impl ForgeError {
    pub fn upstream(provider: Provider, message: impl Into<String>) -> Self {
        Self::UpstreamApi {
            provider,
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole request stream
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AgentNotFound(_) | Self::InvalidTransition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ForgeError::AgentNotFound("ghost".to_string()).to_string(),
            "Agent 'ghost' not found"
        );
        let err = ForgeError::ModelUnavailable {
            capabilities: vec!["vision".to_string(), "reasoning".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No available model satisfies capabilities [vision, reasoning]"
        );
        assert_eq!(
            ForgeError::upstream(Provider::OpenAi, "status 500").to_string(),
            "openai API error: status 500"
        );
        assert_eq!(
            ForgeError::Validation(vec!["empty".to_string(), "too short".to_string()]).to_string(),
            "Response failed review: empty; too short"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ForgeError::AgentNotFound("x".to_string()).is_fatal());
        assert!(
            ForgeError::InvalidTransition {
                from: WorkflowStep::Deliver,
                to: WorkflowStep::Analyze,
            }
            .is_fatal()
        );
        assert!(!ForgeError::upstream(Provider::Anthropic, "timeout").is_fatal());
        assert!(!ForgeError::Validation(vec![]).is_fatal());
        assert!(!ForgeError::Cancelled.is_fatal());
    }
}
