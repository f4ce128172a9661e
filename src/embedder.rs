use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Capability to turn text into a fixed-length vector.
///
/// Futures returned by `embed` hold no shared state, so callers can bound
/// them with `tokio::time::timeout` or drop them to cancel.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

/// Instruction-tuned embedding models expect passages and queries to be
/// marked differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedRole {
    Passage,
    Query,
}

impl EmbedRole {
    pub fn prefix(self) -> &'static str {
        match self {
            EmbedRole::Passage => "passage: ",
            EmbedRole::Query => "query: ",
        }
    }

    pub fn apply(self, text: &str) -> String {
        format!("{}{}", self.prefix(), text)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint (LM Studio, vLLM, ...).
pub struct OpenAiEmbedder {
    client: Client,
    url: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            input: text,
            model: &self.model,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::embedding(format!("Embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::embedding(format!("Embedding failed: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::embedding(format!("Failed to read embedding response: {e}")))?;

        parse_embedding(&body)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn parse_embedding(body: &str) -> Result<Vec<f32>> {
    let parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| Error::embedding(format!("Malformed embedding response: {e}")))?;

    let embedding = parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| Error::embedding("Embedding response contained no data"))?;

    if embedding.is_empty() {
        return Err(Error::embedding("Embedding response contained an empty vector"));
    }
    Ok(embedding)
}
