//! HTTP backends for the model and search traits
//!
//! Each provider turns a [`ModelCall`](crate::models::ModelCall) into one
//! request against its chat endpoint and yields the whole reply as a single
//! response chunk. Credentials never appear in `Debug` output.

pub mod anthropic;
pub mod openai;
pub mod serp;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;
pub use serp::SerpApiSearch;

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use futures_util::stream;
use reqwest::Client;

use crate::error::ForgeError;
use crate::models::{BackendChunk, ChunkStream, Provider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Wrap a finished completion as a one-chunk stream, or map its failure
fn single_chunk(provider: Provider, result: Result<String>) -> Result<ChunkStream, ForgeError> {
    match result {
        Ok(text) => Ok(stream::iter([BackendChunk::Response(text)]).boxed()),
        Err(e) => Err(ForgeError::upstream(provider, format!("{:#}", e))),
    }
}
