//! Anthropic messages backend

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ForgeError;
use crate::models::{ChatMessage, ChatRole, ChunkStream, ModelBackend, ModelCall, Provider};

use super::{http_client, single_chunk};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// System messages move to the top-level `system` field
    fn to_anthropic_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let rest = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| AnthropicMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect();
        let system = if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        };
        (system, rest)
    }

    fn request_body(call: &ModelCall) -> AnthropicRequest {
        let (system, messages) = Self::to_anthropic_messages(&call.messages);
        AnthropicRequest {
            model: call.model.clone(),
            max_tokens: call.max_tokens,
            temperature: call.temperature,
            system,
            messages,
        }
    }

    fn from_anthropic_response(resp: AnthropicApiResponse) -> Result<String> {
        let text: Vec<String> = resp
            .content
            .into_iter()
            .filter_map(|b| match b {
                AnthropicBlock::Text { text } => Some(text),
                AnthropicBlock::Other => None,
            })
            .collect();
        if text.is_empty() {
            return Err(anyhow!("Anthropic response had no text blocks"));
        }
        Ok(text.concat())
    }

    async fn complete(&self, call: &ModelCall) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::request_body(call);
        debug!(
            "Anthropic request: model={}, messages={}",
            body.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: AnthropicApiResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic API response")?;
        Self::from_anthropic_response(api_response)
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn call(&self, call: ModelCall) -> Result<ChunkStream, ForgeError> {
        single_chunk(Provider::Anthropic, self.complete(&call).await)
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicApiResponse {
    content: Vec<AnthropicBlock>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResolvedModel, SelectionPath};

    fn call(messages: Vec<ChatMessage>) -> ModelCall {
        let model = ResolvedModel {
            name: "claude-3-sonnet-20240229".to_string(),
            provider: Provider::Anthropic,
            max_tokens: 4096,
            temperature: 0.7,
            path: SelectionPath::Preferred,
        };
        ModelCall::new(&model, messages)
    }

    #[test]
    fn test_system_moves_to_top_level() {
        let body = AnthropicBackend::request_body(&call(vec![
            ChatMessage::system("Be terse."),
            ChatMessage::user("hello"),
        ]));
        assert_eq!(body.system.as_deref(), Some("Be terse."));
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].role, "user");

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "claude-3-sonnet-20240229");
    }

    #[test]
    fn test_no_system_field_when_absent() {
        let body = AnthropicBackend::request_body(&call(vec![ChatMessage::user("hello")]));
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("system").is_none());
    }

    #[test]
    fn test_from_anthropic_response_skips_other_blocks() {
        let resp: AnthropicApiResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "Hello "},
                {"type": "tool_use", "id": "t1", "name": "x", "input": {}},
                {"type": "text", "text": "there"}
            ],
            "stop_reason": "end_turn"
        }))
        .unwrap();
        assert_eq!(
            AnthropicBackend::from_anthropic_response(resp).unwrap(),
            "Hello there"
        );

        let empty = AnthropicApiResponse { content: vec![] };
        assert!(AnthropicBackend::from_anthropic_response(empty).is_err());
    }

    #[test]
    fn test_anthropic_backend_debug_hides_key() {
        let backend = AnthropicBackend::new("sk-ant-secret", None).unwrap();
        let debug = format!("{:?}", backend);
        assert!(!debug.contains("sk-ant-secret"));
    }
}
