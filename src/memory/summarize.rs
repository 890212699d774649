//! Transcript summarization
//!
//! Turns a finished transcript into structured memory through the OpenAI
//! responses endpoint. The prompt instructs the model to reply with JSON
//! only; replies wrapped in markdown code fences are unwrapped before
//! parsing.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{MemoryItem, Progress};
use crate::config::SummaryConfig;
use crate::{Error, Result};

/// Structured output of one summarization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SummaryData {
    /// Short narrative summary of the session
    pub summary: String,
    /// Progress observed in this session
    pub progress: Progress,
    /// Memorable items that came up
    pub recent_items: Vec<MemoryItem>,
    /// Things the user explicitly asked for
    pub recent_user_requests: Vec<String>,
}

/// Produces structured summaries from a rendered prompt.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a transcript prompt into structured memory.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend is unreachable or replies with
    /// something that is not the expected JSON.
    async fn summarize(&self, prompt: &str) -> Result<SummaryData>;
}

/// Response envelope of the OpenAI responses API
#[derive(Deserialize)]
struct ResponsesPayload {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Summarizer backed by the OpenAI responses endpoint.
pub struct HttpSummarizer {
    client: reqwest::Client,
    config: SummaryConfig,
    api_key: String,
}

impl std::fmt::Debug for HttpSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSummarizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpSummarizer {
    /// Create a new HTTP summarizer.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the HTTP client
    /// cannot be built.
    pub fn new(config: SummaryConfig, api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "API key required for summarization".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, prompt: &str) -> Result<SummaryData> {
        tracing::debug!(prompt_chars = prompt.len(), "requesting summary");

        let response = self
            .client
            .post(&self.config.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.config.model,
                "input": prompt,
            }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "summary request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "summary API error");
            return Err(Error::Summarization(format!(
                "summary API error {status}: {body}"
            )));
        }

        let payload: ResponsesPayload = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse summary response");
            e
        })?;

        let text: String = payload
            .output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .map(|part| part.text.as_str())
            .collect();

        parse_summary(&text)
    }
}

/// Parse the model's reply, tolerating markdown code fences.
fn parse_summary(raw: &str) -> Result<SummaryData> {
    let body = strip_fences(raw);
    serde_json::from_str(body).map_err(|e| {
        tracing::warn!(error = %e, reply = %truncate(raw, 200), "summary reply was not valid JSON");
        Error::Summarization(format!("unparsable summary reply: {e}"))
    })
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
