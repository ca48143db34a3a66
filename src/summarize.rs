// src/summarize.rs
// Best-effort summarization behind a trait. A provider failure never blocks
// dispatch; callers degrade to a raw excerpt.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
    fn provider_name(&self) -> &'static str;
}

pub type DynSummarizer = Arc<dyn Summarizer>;

/// Factory: real provider when OPENAI_API_KEY is set, otherwise a disabled
/// client whose callers fall back to excerpts.
pub fn build_summarizer() -> DynSummarizer {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Arc::new(OpenAiSummarizer::new(key)),
        _ => {
            tracing::info!("summarizer disabled (no OPENAI_API_KEY)");
            Arc::new(DisabledSummarizer)
        }
    }
}

pub struct OpenAiSummarizer {
    api_key: String,
    model: String,
    client: Client,
    timeout: Duration,
}

impl OpenAiSummarizer {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "gpt-4o-mini".to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait::async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        let prompt = format!(
            "Summarize each of the following channel messages in one or two \
             precise sentences. Keep message ids, senders and technical \
             details; mark replies as replies. Do not invent content.\n\n{text}"
        );
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0,
            "max_tokens": 1000,
        });

        let rsp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("summarizer post")?
            .error_for_status()
            .context("summarizer non-2xx")?;

        let value: serde_json::Value = rsp.json().await.context("summarizer body")?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("summarizer returned no content"))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

pub struct DisabledSummarizer;

#[async_trait::async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _text: &str) -> Result<String> {
        Err(anyhow!("summarizer disabled"))
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Char-boundary-safe excerpt used when summarization degrades.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
