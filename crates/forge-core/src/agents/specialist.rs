//! Data-driven specialist agent
//!
//! Every configured specialist is the same type parameterized by its
//! descriptor: retrieve documents, pick a model, stream the answer.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, warn};

use super::profile::AgentDescriptor;
use super::{Agent, AgentRequest};
use crate::documents::{DocumentStore, render_context};
use crate::error::ForgeError;
use crate::models::{BackendChunk, BackendPool, ChatMessage, ModelRequirements, ModelSelector};
use crate::stream::{EventKind, EventSink};

/// Documents pulled per request
pub const DEFAULT_DOCUMENT_K: usize = 5;

pub struct SpecialistAgent {
    descriptor: AgentDescriptor,
    selector: Arc<ModelSelector>,
    backends: Arc<BackendPool>,
    documents: Option<Arc<dyn DocumentStore>>,
    document_k: usize,
}

impl std::fmt::Debug for SpecialistAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecialistAgent")
            .field("id", &self.descriptor.id)
            .field("documents", &self.documents.is_some())
            .finish()
    }
}

impl SpecialistAgent {
    pub fn new(
        descriptor: AgentDescriptor,
        selector: Arc<ModelSelector>,
        backends: Arc<BackendPool>,
    ) -> Self {
        Self {
            descriptor,
            selector,
            backends,
            documents: None,
            document_k: DEFAULT_DOCUMENT_K,
        }
    }

    pub fn with_documents(mut self, store: Arc<dyn DocumentStore>, k: usize) -> Self {
        self.documents = Some(store);
        self.document_k = k;
        self
    }

    fn system_prompt(&self) -> String {
        let d = &self.descriptor;
        let mut prompt = format!("You are {}, a specialized assistant.", d.display_name);
        if !d.description.is_empty() {
            prompt.push_str(&format!(" {}", d.description));
        }
        if !d.instructions.is_empty() {
            prompt.push_str(&format!("\n\n{}", d.instructions.trim()));
        }
        if !d.expertise.is_empty() {
            prompt.push_str(&format!("\n\nAreas of expertise: {}.", d.expertise.join(", ")));
        }
        prompt.push_str("\n\nAnswer the query using any relevant context provided.");
        prompt
    }

    fn user_prompt(request: &AgentRequest, doc_context: &str) -> String {
        let mut prompt = request.query.clone();
        if !doc_context.is_empty() {
            prompt.push_str(&format!("\n\nRelevant context from documents:\n{}", doc_context));
        }
        if let Some(context) = &request.context {
            prompt.push_str(&format!("\n\nAdditional context:\n{}", context));
        }
        if let (Some(feedback), Some(draft)) = (&request.feedback, &request.previous_draft) {
            prompt.push_str(&format!(
                "\n\nYour previous answer was:\n{}\n\nRevise it to address this feedback:\n{}",
                draft, feedback
            ));
        }
        prompt
    }

    async fn retrieve(&self, query: &str, events: &EventSink) -> String {
        let Some(store) = &self.documents else {
            return String::new();
        };
        match store.query(query, &self.descriptor.id, self.document_k).await {
            Ok(docs) => {
                debug!(
                    "SpecialistAgent '{}': {} documents retrieved",
                    self.descriptor.id,
                    docs.len()
                );
                render_context(&docs)
            }
            Err(e) => {
                warn!("SpecialistAgent '{}': document lookup failed: {}", self.descriptor.id, e);
                events.error(format!("Document lookup failed: {}", e)).await;
                String::new()
            }
        }
    }
}

#[async_trait]
impl Agent for SpecialistAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn process(&self, request: AgentRequest, events: &EventSink) -> Result<String, ForgeError> {
        let events = events.for_agent(self.descriptor.id.clone());
        let doc_context = self.retrieve(&request.query, &events).await;

        let requirements = ModelRequirements::new(&self.descriptor.model_capabilities)
            .with_preferred(
                request
                    .preferred_model
                    .clone()
                    .or_else(|| self.descriptor.preferred_model.clone()),
            )
            .with_temperature(request.temperature.or(self.descriptor.temperature))
            .with_hints(request.model_type, request.model_category);
        let model = self.selector.select(&requirements);

        let verb = if request.is_revision() { "Revising" } else { "Analyzing" };
        events
            .emit(
                crate::stream::StreamEvent::text(
                    EventKind::Thinking,
                    format!("{} query with {}...", verb, model.name),
                )
                .with_details(serde_json::json!({
                    "model": model.name,
                    "provider": model.provider,
                    "selection": model.path,
                })),
            )
            .await;

        let messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(Self::user_prompt(&request, &doc_context)),
        ];
        let mut stream = self.backends.call(&model, messages).await?;

        let mut response = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                BackendChunk::Response(text) => {
                    if request.emit_content {
                        events.content(text.clone()).await;
                    }
                    response.push_str(&text);
                }
                BackendChunk::Error(message) => {
                    return Err(ForgeError::upstream(model.provider, message));
                }
            }
        }
        debug!(
            "SpecialistAgent '{}': {} chars from {}",
            self.descriptor.id,
            response.len(),
            model.name
        );
        Ok(response)
    }
}
