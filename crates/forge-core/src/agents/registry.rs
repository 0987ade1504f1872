//! Agent registry: id → live agent, in registration order

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::Agent;
use super::profile::AgentDescriptor;
use crate::error::ForgeError;

/// Process-wide set of agents. Built at startup, then shared read-only.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
    index: HashMap<String, usize>,
    fallback_id: Option<String>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.ids())
            .field("fallback_id", &self.fallback_id)
            .finish()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Empty and duplicate ids are rejected.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), ForgeError> {
        let descriptor = agent.descriptor();
        descriptor.validate()?;
        if self.index.contains_key(&descriptor.id) {
            return Err(ForgeError::Registry(format!(
                "duplicate agent id '{}'",
                descriptor.id
            )));
        }
        info!(
            "AgentRegistry: registered '{}' ({}) with {} routing terms",
            descriptor.id,
            descriptor.display_name,
            descriptor.routing_terms().len()
        );
        self.index.insert(descriptor.id.clone(), self.agents.len());
        self.agents.push(agent);
        Ok(())
    }

    /// Designate the agent used when routing finds no candidate
    pub fn set_fallback(&mut self, id: &str) -> Result<(), ForgeError> {
        if !self.index.contains_key(id) {
            return Err(ForgeError::Registry(format!(
                "fallback agent '{}' is not registered",
                id
            )));
        }
        info!("AgentRegistry: fallback agent is '{}'", id);
        self.fallback_id = Some(id.to_string());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Agent>> {
        self.index.get(id).map(|&i| &self.agents[i])
    }

    pub fn descriptor(&self, id: &str) -> Option<&AgentDescriptor> {
        self.get(id).map(|a| a.descriptor())
    }

    /// Look up by exact id, then by loose name (case, spaces vs underscores,
    /// display name)
    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn Agent>> {
        let name = name.trim();
        if let Some(agent) = self.get(name) {
            return Some(agent);
        }
        let wanted = name.to_lowercase();
        let wanted_underscored = wanted.replace(' ', "_");
        let found = self.agents.iter().find(|agent| {
            agent
                .descriptor()
                .name_variants()
                .iter()
                .any(|v| *v == wanted || *v == wanted_underscored)
        });
        if let Some(agent) = found {
            debug!("AgentRegistry: resolved '{}' to '{}'", name, agent.id());
        }
        found
    }

    pub fn fallback(&self) -> Option<&Arc<dyn Agent>> {
        self.fallback_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn fallback_id(&self) -> Option<&str> {
        self.fallback_id.as_deref()
    }

    /// Agents in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Agent>> {
        self.agents.iter()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.iter().map(|a| a.descriptor())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Every routing, gating and expertise term of the specialists, lowercased.
    /// The fallback agent is excluded so that general chatter is not "in domain".
    pub fn domain_vocabulary(&self) -> Vec<String> {
        let mut vocabulary: Vec<String> = Vec::new();
        for descriptor in self.descriptors() {
            if Some(descriptor.id.as_str()) == self.fallback_id() {
                continue;
            }
            let terms = descriptor
                .routing_terms()
                .into_iter()
                .chain(descriptor.domain_terms.iter().map(|t| t.to_lowercase()))
                .chain(descriptor.expertise.iter().map(|t| t.to_lowercase()));
            for term in terms {
                if !term.is_empty() && !vocabulary.contains(&term) {
                    vocabulary.push(term);
                }
            }
        }
        vocabulary
    }
}
