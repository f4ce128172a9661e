use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::retriever::RetrievalIndex;

#[derive(Debug, Serialize, PartialEq)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatClient {
    client: Client,
    url: String,
    config: LlmConfig,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            config,
        })
    }

    pub async fn complete(&self, question: &str, context: &str) -> Result<String> {
        if question.trim().is_empty() {
            return Err(Error::generation("Question cannot be empty"));
        }

        let request = self.construct_request(question, context);
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::generation(format!("Chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::generation(format!("Chat completion failed: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::generation(format!("Failed to read chat response: {e}")))?;
        parse_completion(&body)
    }

    fn construct_request<'a>(&'a self, question: &str, context: &str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.config.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Context:\n{context}\n\nQuestion:\n{question}"),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

fn parse_completion(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::generation(format!("Malformed chat response: {e}")))?;

    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| Error::generation("Chat response contained no choices"))
}

/// Answers questions from the knowledge base: retrieve, then generate.
pub struct Assistant {
    index: Arc<RetrievalIndex>,
    chat: ChatClient,
}

impl Assistant {
    pub fn new(index: Arc<RetrievalIndex>, chat: ChatClient) -> Self {
        Self { index, chat }
    }

    pub async fn ask(&self, question: &str) -> Result<String> {
        let context = self.index.retrieve(question).await?;
        tracing::debug!("Context for {:?}: {} chars", question, context.len());
        self.chat.complete(question, &context).await
    }
}
