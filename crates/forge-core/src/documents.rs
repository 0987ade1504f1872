//! Document retrieval seam used by specialist agents

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ForgeError;

/// A retrieved document fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Value::Null,
        }
    }

    /// The `source` metadata field, when present
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

/// Per-agent document search. Ingestion and storage live elsewhere.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, query: &str, agent_id: &str, k: usize)
    -> Result<Vec<Document>, ForgeError>;
}

/// Render retrieved documents as prompt context
pub fn render_context(docs: &[Document]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, doc)| match doc.source() {
            Some(source) => format!("[{}] ({})\n{}", i + 1, source, doc.content),
            None => format!("[{}]\n{}", i + 1, doc.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
