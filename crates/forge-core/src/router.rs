//! Agent routing by keyword confidence
//!
//! Each agent's task types and keywords are matched against the query's words.
//! Agents with gating terms score exactly zero unless one of them appears.
//! Candidates above the threshold are returned best first; ties keep
//! registration order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agents::{Agent, AgentDescriptor, AgentRegistry, contains_term, tokenize};
use crate::error::ForgeError;

/// How raw match counts become a confidence in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScoreNormalization {
    /// Divide by the number of distinct routing terms
    #[default]
    TotalTerms,
    /// Divide by a fixed count, so `matches` hits already mean full confidence
    SaturateAt { matches: u32 },
}

/// Router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Scores must be strictly greater than this to be a candidate
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub normalization: ScoreNormalization,
}

fn default_threshold() -> f32 {
    0.5
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            normalization: ScoreNormalization::default(),
        }
    }
}

/// A routing candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteCandidate {
    pub agent_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct AgentRouter {
    config: RouterConfig,
}

impl AgentRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Confidence that `descriptor` can handle `query`, in [0, 1]
    pub fn score(&self, query: &str, descriptor: &AgentDescriptor) -> f32 {
        let tokens = tokenize(query);
        if !descriptor.passes_domain_gate(&tokens) {
            return 0.0;
        }

        let terms = descriptor.routing_terms();
        if terms.is_empty() {
            return 0.0;
        }
        let matches = terms.iter().filter(|t| contains_term(&tokens, t)).count();

        let normaliser = match self.config.normalization {
            ScoreNormalization::TotalTerms => terms.len() as f32,
            ScoreNormalization::SaturateAt { matches: 0 } => return 0.0,
            ScoreNormalization::SaturateAt { matches: n } => n as f32,
        };
        (matches as f32 / normaliser).clamp(0.0, 1.0)
    }

    /// Score every registered agent, best first; ties keep registration order
    pub fn rank(&self, query: &str, registry: &AgentRegistry) -> Vec<RouteCandidate> {
        let mut ranked: Vec<RouteCandidate> = registry
            .descriptors()
            .map(|d| RouteCandidate {
                agent_id: d.id.clone(),
                score: self.score(query, d),
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }

    /// Candidates scoring above the threshold. Empty means "no specialist".
    pub fn route(&self, query: &str, registry: &AgentRegistry) -> Vec<RouteCandidate> {
        let candidates: Vec<RouteCandidate> = self
            .rank(query, registry)
            .into_iter()
            .filter(|c| c.score > self.config.threshold)
            .collect();
        debug!(
            "AgentRouter: {} candidates above {:.2} for '{}'",
            candidates.len(),
            self.config.threshold,
            truncate(query, 60)
        );
        candidates
    }

    /// Bypass scoring for an explicitly requested agent
    pub fn route_forced(
        &self,
        agent_id: &str,
        registry: &AgentRegistry,
    ) -> Result<Arc<dyn Agent>, ForgeError> {
        registry
            .resolve(agent_id)
            .cloned()
            .ok_or_else(|| ForgeError::AgentNotFound(agent_id.to_string()))
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
