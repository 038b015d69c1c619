//! Chat completion client for OpenAI-compatible endpoints.
//!
//! [`CompletionClient`] is the seam between the answer pipeline and the
//! hosted model: one non-streaming call (used for query rewriting) and one
//! streaming call that pushes text fragments into a bounded channel as SSE
//! data lines arrive.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::LlmConfig;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// A prompt entry as sent to the completions endpoint. Unlike
/// [`crate::models::ChatMessage`], this includes the system role.
#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

/// Interface to the hosted completion model.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// One-shot completion; returns the full response text.
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String>;

    /// Streaming completion; each text fragment is sent on `tx` as it
    /// arrives. Returns once the stream is exhausted.
    async fn complete_streaming(
        &self,
        messages: &[PromptMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<()>;
}

/// Client for the OpenAI chat completions API.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl OpenAiChatClient {
    /// Reads `OPENAI_API_KEY` from the environment.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn messages_to_json(messages: &[PromptMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect()
    }

    fn request_body(&self, messages: &[PromptMessage], stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": Self::messages_to_json(messages),
            "temperature": self.temperature,
            "stream": stream,
        })
    }

    /// Parse a single SSE data line. Returns the parsed JSON if valid.
    fn parse_sse_line(line: &str) -> Option<Value> {
        let data = line.strip_prefix("data: ")?;
        if data == "[DONE]" {
            return None;
        }
        serde_json::from_str(data).ok()
    }

    /// Extract the content delta from a streamed chunk, if any.
    fn delta_content(data: &Value) -> Option<String> {
        let content = data
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()?;
        if content.is_empty() {
            None
        } else {
            Some(content.to_string())
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiChatClient {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(messages, false))
            .send()
            .await?;

        let status = response.status();
        let body_text = response.text().await?;
        if !status.is_success() {
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let body: Value = serde_json::from_str(&body_text)?;
        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("No content in completion response"))?;

        Ok(content.to_string())
    }

    async fn complete_streaming(
        &self,
        messages: &[PromptMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<()> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "sending streaming completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(messages, true))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        // Stream SSE events incrementally, splitting on complete lines.
        let mut byte_stream = response.bytes_stream();
        let mut line_buffer = String::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result?;
            line_buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline_pos) = line_buffer.find('\n') {
                let line = line_buffer[..newline_pos].trim().to_string();
                line_buffer.drain(..=newline_pos);

                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                if line == "data: [DONE]" {
                    return Ok(());
                }
                if let Some(data) = Self::parse_sse_line(&line) {
                    if let Some(content) = Self::delta_content(&data) {
                        if tx.send(content).await.is_err() {
                            // Receiver gone; keep draining so the request
                            // completes cleanly.
                            debug!("fragment receiver dropped mid-stream");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
