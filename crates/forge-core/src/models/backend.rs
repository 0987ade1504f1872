//! Provider-agnostic backend contract and the per-process backend pool

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::catalog::Provider;
use super::selector::ResolvedModel;
use crate::error::ForgeError;

/// Provider-agnostic chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One generation request against a concrete model
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub model: String,
    pub provider: Provider,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl ModelCall {
    pub fn new(model: &ResolvedModel, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.name.clone(),
            provider: model.provider,
            messages,
            temperature: model.temperature,
            max_tokens: model.max_tokens,
            stream: true,
        }
    }

    /// The system prompt, if the first message carries one
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
    }
}

/// A unit of backend output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum BackendChunk {
    Response(String),
    Error(String),
}

pub type ChunkStream = BoxStream<'static, BackendChunk>;

/// The only way text gets generated. Provider wire formats stay behind this trait.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn provider(&self) -> Provider;

    /// Start a generation. Transport failures may surface either as `Err`
    /// or as an `Error` chunk inside the stream.
    async fn call(&self, call: ModelCall) -> Result<ChunkStream, ForgeError>;
}

/// Backends keyed by provider, built once at process start from the
/// credentials that were supplied. Read-only afterwards.
#[derive(Clone, Default)]
pub struct BackendPool {
    backends: HashMap<Provider, Arc<dyn ModelBackend>>,
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendPool")
            .field("providers", &self.providers())
            .finish()
    }
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend, replacing any earlier one for the same provider
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        let provider = backend.provider();
        if self.backends.insert(provider, backend).is_some() {
            warn!("BackendPool: replaced existing {} backend", provider);
        }
        self
    }

    /// Providers with a configured backend, in a stable order
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.backends.keys().copied().collect();
        providers.sort();
        providers
    }

    pub fn get(&self, provider: Provider) -> Option<&Arc<dyn ModelBackend>> {
        self.backends.get(&provider)
    }

    /// Start a streaming call against the resolved model
    pub async fn call(
        &self,
        model: &ResolvedModel,
        messages: Vec<ChatMessage>,
    ) -> Result<ChunkStream, ForgeError> {
        let backend = self.get(model.provider).ok_or_else(|| {
            ForgeError::upstream(
                model.provider,
                format!("no backend configured for model {}", model.name),
            )
        })?;
        debug!(
            "BackendPool: calling {} ({}) with {} messages",
            model.name,
            model.provider,
            messages.len()
        );
        backend.call(ModelCall::new(model, messages)).await
    }

    /// Run a call to completion and return the concatenated response text
    pub async fn complete(
        &self,
        model: &ResolvedModel,
        messages: Vec<ChatMessage>,
    ) -> Result<String, ForgeError> {
        let stream = self.call(model, messages).await?;
        let chunks = collect_chunks(stream, model.provider).await?;
        Ok(chunks.concat())
    }
}

/// Drain a chunk stream, failing on the first error chunk
pub async fn collect_chunks(
    mut stream: ChunkStream,
    provider: Provider,
) -> Result<Vec<String>, ForgeError> {
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            BackendChunk::Response(text) => chunks.push(text),
            BackendChunk::Error(message) => return Err(ForgeError::upstream(provider, message)),
        }
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SelectionPath;
    use futures_util::stream;

    struct EchoBackend;

    #[async_trait]
    impl ModelBackend for EchoBackend {
        fn provider(&self) -> Provider {
            Provider::OpenAi
        }

        async fn call(&self, call: ModelCall) -> Result<ChunkStream, ForgeError> {
            let last = call
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(stream::iter(vec![
                BackendChunk::Response("echo: ".to_string()),
                BackendChunk::Response(last),
            ])
            .boxed())
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl ModelBackend for BrokenBackend {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn call(&self, _call: ModelCall) -> Result<ChunkStream, ForgeError> {
            Ok(stream::iter(vec![
                BackendChunk::Response("partial".to_string()),
                BackendChunk::Error("overloaded".to_string()),
            ])
            .boxed())
        }
    }

    fn resolved(provider: Provider) -> ResolvedModel {
        ResolvedModel {
            name: "test-model".to_string(),
            provider,
            max_tokens: 100,
            temperature: 0.5,
            path: SelectionPath::Ranked,
        }
    }

    #[test]
    fn test_chunk_wire_shape() {
        let json = serde_json::to_value(BackendChunk::Response("hi".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "response", "content": "hi"}));
        let chunk: BackendChunk =
            serde_json::from_value(serde_json::json!({"type": "error", "content": "boom"})).unwrap();
        assert_eq!(chunk, BackendChunk::Error("boom".to_string()));
    }

    #[test]
    fn test_model_call_system_prompt() {
        let call = ModelCall::new(
            &resolved(Provider::OpenAi),
            vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
        );
        assert_eq!(call.system_prompt(), Some("be brief"));
        assert_eq!(call.temperature, 0.5);
        assert!(call.stream);
    }

    #[tokio::test]
    async fn test_pool_complete() {
        let pool = BackendPool::new().with_backend(Arc::new(EchoBackend));
        let text = pool
            .complete(&resolved(Provider::OpenAi), vec![ChatMessage::user("hello")])
            .await
            .unwrap();
        assert_eq!(text, "echo: hello");
    }

    #[tokio::test]
    async fn test_pool_missing_backend_is_upstream_error() {
        let pool = BackendPool::new().with_backend(Arc::new(EchoBackend));
        let err = pool
            .complete(&resolved(Provider::Anthropic), vec![ChatMessage::user("hello")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ForgeError::UpstreamApi {
                provider: Provider::Anthropic,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_error_chunk_fails_collection() {
        let pool = BackendPool::new().with_backend(Arc::new(BrokenBackend));
        let err = pool
            .complete(&resolved(Provider::Anthropic), vec![])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_providers_sorted() {
        let pool = BackendPool::new()
            .with_backend(Arc::new(BrokenBackend))
            .with_backend(Arc::new(EchoBackend));
        assert_eq!(pool.providers(), vec![Provider::OpenAi, Provider::Anthropic]);
    }
}
