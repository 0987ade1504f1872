//! OpenAI chat completions backend

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ForgeError;
use crate::models::{ChatMessage, ChunkStream, ModelBackend, ModelCall, Provider};

use super::{http_client, single_chunk};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiBackend {
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

    fn to_openai_messages(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn request_body(call: &ModelCall) -> OpenAiRequest {
        OpenAiRequest {
            model: call.model.clone(),
            messages: Self::to_openai_messages(&call.messages),
            temperature: call.temperature,
            max_tokens: call.max_tokens,
        }
    }

    fn from_openai_response(resp: OpenAiApiResponse) -> Result<String> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI response had no choices"))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    async fn complete(&self, call: &ModelCall) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::request_body(call);
        debug!(
            "OpenAI request: model={}, messages={}",
            body.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAiApiResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI API response")?;
        Self::from_openai_response(api_response)
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn call(&self, call: ModelCall) -> Result<ChunkStream, ForgeError> {
        single_chunk(Provider::OpenAi, self.complete(&call).await)
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}
