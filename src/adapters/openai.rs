//! OpenAI-compatible HTTP client for summaries and embeddings.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Embedder, Summarizer};
use crate::domain::Episode;
use crate::stages::build_prompt;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Chat completion settings for summaries
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Host names the summary must use instead of "the hosts"
    pub hosts: Vec<String>,
}

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    chat: ChatSettings,
    embedding_model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        chat: ChatSettings,
        embedding_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            chat,
            embedding_model: embedding_model.into(),
        })
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned HTTP {}: {}", url, status, body.trim());
        }

        response
            .json()
            .await
            .with_context(|| format!("Invalid response from {}", url))
    }
}

#[async_trait]
impl Summarizer for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn summarize(&self, episode: &Episode, transcript: &str) -> Result<String> {
        let prompt = build_prompt(episode, transcript, &self.chat.hosts);
        let request = ChatRequest {
            model: &self.chat.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.chat.temperature,
            max_tokens: self.chat.max_tokens,
        };

        let response: ChatResponse = self.post("chat/completions", &request).await?;

        if let Some(usage) = response.usage.as_ref() {
            info!(slug = %episode.slug, tokens = usage.total_tokens, "Summary generated");
        }

        extract_summary(response)
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let response: EmbeddingResponse = self.post("embeddings", &request).await?;
        debug!(inputs = texts.len(), "Embedded texts");

        order_embeddings(response, texts.len())
    }
}

fn extract_summary(response: ChatResponse) -> Result<String> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    if content.trim().is_empty() {
        anyhow::bail!("Summarizer returned an empty response");
    }
    Ok(content)
}

/// Put embeddings back in input order and check none are missing
fn order_embeddings(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in response.data {
        let slot = slots
            .get_mut(item.index)
            .with_context(|| format!("Embedding index {} out of range", item.index))?;
        *slot = Some(item.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.with_context(|| format!("Missing embedding for input {}", i)))
        .collect()
}
