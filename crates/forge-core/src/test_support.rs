//! Mock backends shared by the unit tests

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;

use crate::error::ForgeError;
use crate::models::{BackendChunk, ChunkStream, ModelBackend, ModelCall, Provider};
use crate::search::{SearchBackend, SearchResponse, SearchResult};

type Responder = dyn Fn(&ModelCall) -> Vec<BackendChunk> + Send + Sync;

/// Model backend that answers from a closure and records every call
pub struct MockBackend {
    provider: Provider,
    responder: Box<Responder>,
    calls: Mutex<Vec<ModelCall>>,
}

impl MockBackend {
    pub fn new<F>(provider: Provider, responder: F) -> Self
    where
        F: Fn(&ModelCall) -> Vec<BackendChunk> + Send + Sync + 'static,
    {
        Self {
            provider,
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same chunks
    pub fn chunks(provider: Provider, chunks: &[&str]) -> Self {
        let chunks: Vec<String> = chunks.iter().map(|s| s.to_string()).collect();
        Self::new(provider, move |_| {
            chunks.iter().cloned().map(BackendChunk::Response).collect()
        })
    }

    /// Always answers with an error chunk
    pub fn failing(provider: Provider, message: &str) -> Self {
        let message = message.to_string();
        Self::new(provider, move |_| vec![BackendChunk::Error(message.clone())])
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn call(&self, call: ModelCall) -> Result<ChunkStream, ForgeError> {
        let chunks = (self.responder)(&call);
        self.calls.lock().unwrap().push(call);
        Ok(stream::iter(chunks).boxed())
    }
}

/// Search backend returning one canned result per query, or failing for
/// queries containing a marker
pub struct MockSearch {
    pub fail_marker: Option<String>,
    pub empty: bool,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self {
            fail_marker: None,
            empty: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::new()
        }
    }

    pub fn empty() -> Self {
        Self {
            empty: true,
            ..Self::new()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchBackend for MockSearch {
    async fn search(&self, query: &str) -> Result<SearchResponse, ForgeError> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(marker) = &self.fail_marker {
            if query.contains(marker.as_str()) {
                return Err(ForgeError::Search {
                    query: query.to_string(),
                    message: "mock failure".to_string(),
                });
            }
        }
        let results = if self.empty {
            Vec::new()
        } else {
            vec![SearchResult {
                title: format!("Result for {}", query),
                link: format!("https://example.com/{}", query.len()),
                snippet: "Rates held steady this week.".to_string(),
                date: "2024-05-01".to_string(),
                source: None,
            }]
        };
        Ok(SearchResponse {
            query: query.to_string(),
            results,
            error: None,
        })
    }
}
