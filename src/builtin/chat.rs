//! Minimal client for OpenAI-compatible chat-completion endpoints.
//!
//! ## Retry strategy
//!
//! HTTP 429 and 5xx answers and transport errors are retried with
//! exponential backoff (`retry_backoff_ms * 2^attempt`). Other 4xx answers
//! fail immediately; repeating a bad request will not fix it.

use crate::config::LlmConfig;
use crate::error::Pdf2EpubError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Something that answers a list of chat messages with text.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, Pdf2EpubError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`ChatClient`] over `POST {url}/chat/completions`.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    key: Option<String>,
    model: String,
    temperature: f32,
    top_p: f32,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl OpenAiCompatibleClient {
    /// Per-request timeout.
    pub const TIMEOUT_SECS: u64 = 120;

    pub fn from_config(config: &LlmConfig) -> Result<Self, Pdf2EpubError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(Self::TIMEOUT_SECS))
            .build()
            .map_err(|e| Pdf2EpubError::LlmApiError {
                message: format!("could not build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            key: config.key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_retries: 3,
            retry_backoff_ms: 500,
        })
    }

    pub fn with_retries(mut self, max_retries: u32, retry_backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One HTTP round trip. `Err((retryable, message))` on failure.
    async fn send_once(&self, messages: &[ChatMessage]) -> Result<String, (bool, String)> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
            stream: false,
        };
        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| (true, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let retryable = status.as_u16() == 429 || status.is_server_error();
            let text = response.text().await.unwrap_or_default();
            return Err((retryable, format!("HTTP {status}: {}", truncate(&text, 300))));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| (false, format!("malformed response body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| (false, "response has no message content".to_string()))
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, Pdf2EpubError> {
        let mut last_err = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "LLM request: retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            match self.send_once(messages).await {
                Ok(content) => {
                    debug!("LLM reply: {} chars", content.len());
                    return Ok(content);
                }
                Err((retryable, message)) => {
                    warn!("LLM request: attempt {} failed: {}", attempt + 1, message);
                    last_err = message;
                    if !retryable {
                        break;
                    }
                }
            }
        }
        Err(Pdf2EpubError::LlmApiError { message: last_err })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\u{2026}", &s[..idx]),
        None => s.to_string(),
    }
}
