//! SerpApi search backend (Google engine)

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::ForgeError;
use crate::search::{SearchBackend, SearchResponse, SearchResult};

use super::http_client;

pub const DEFAULT_ENDPOINT: &str = "https://serpapi.com/search.json";
const MAX_ORGANIC: usize = 5;
const MAX_NEWS: usize = 3;

pub struct SerpApiSearch {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl std::fmt::Debug for SerpApiSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerpApiSearch")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl SerpApiSearch {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Top organic hits followed by top news hits
    fn parse_results(data: &Value) -> Vec<SearchResult> {
        let section = |key: &str, limit: usize| -> Vec<SearchResult> {
            data.get(key)
                .and_then(Value::as_array)
                .map(|items| items.iter().take(limit).map(to_result).collect())
                .unwrap_or_default()
        };
        let mut results = section("organic_results", MAX_ORGANIC);
        results.extend(section("news_results", MAX_NEWS));
        results
    }

    async fn fetch(&self, query: &str) -> Result<Value> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("engine", "google"), ("q", query), ("api_key", self.api_key.as_str())])
            .send()
            .await
            .context("Failed to send request to SerpApi")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("SerpApi request failed with status {}: {}", status, error_text));
        }
        response.json().await.context("Failed to parse SerpApi response")
    }
}

fn field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn to_result(item: &Value) -> SearchResult {
    // News sources come back either as a plain name or as an object
    let source = match item.get("source") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(obj @ Value::Object(_)) => obj.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    };
    SearchResult {
        title: field(item, "title"),
        link: field(item, "link"),
        snippet: field(item, "snippet"),
        date: field(item, "date"),
        source,
    }
}

#[async_trait]
impl SearchBackend for SerpApiSearch {
    async fn search(&self, query: &str) -> Result<SearchResponse, ForgeError> {
        let data = self.fetch(query).await.map_err(|e| ForgeError::Search {
            query: query.to_string(),
            message: format!("{:#}", e),
        })?;
        if let Some(error) = data.get("error").and_then(Value::as_str) {
            return Err(ForgeError::Search {
                query: query.to_string(),
                message: error.to_string(),
            });
        }

        let results = Self::parse_results(&data);
        debug!("SerpApi: {} results for '{}'", results.len(), query);
        Ok(SearchResponse {
            query: query.to_string(),
            results,
            error: None,
        })
    }
}
