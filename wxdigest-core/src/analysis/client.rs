//! Chat-completion client for OpenAI-compatible providers.
//!
//! Zhipu, DeepSeek and OpenAI all accept `POST {base_url}/chat/completions`
//! with bearer auth, so one HTTP client covers every configured provider.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;

use crate::config::{LlmProvider, ResolvedLlm};
use crate::types::TokenUsage;
use crate::{Error, Result};

/// One chat request: a system message and a user message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The model's reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Option<TokenUsage>,
    /// Model name the provider reports, falling back to the requested one
    pub model: String,
}

/// Chat-completion interface at the provider seam.
pub trait ChatClient: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion>;

    /// Provider label used in logs and user messages.
    fn provider_name(&self) -> &str {
        "llm"
    }
}

/// Closed set of provider failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 401: key missing or invalid
    Unauthorized,
    /// 402/403: no permission or quota exhausted
    Forbidden,
    /// 429: too many requests
    RateLimited,
    /// Anything else, including timeouts and connection errors
    Other,
}

impl FailureKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => FailureKind::Unauthorized,
            402 | 403 => FailureKind::Forbidden,
            429 => FailureKind::RateLimited,
            _ => FailureKind::Other,
        }
    }
}

/// A failed provider call. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub provider: String,
    /// HTTP status, when the provider answered at all
    pub status: Option<u16>,
    /// Provider-reported detail
    pub message: String,
}

impl ProviderFailure {
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        Self {
            kind: FailureKind::from_status(status),
            provider: provider.to_string(),
            status: Some(status),
            message: parse_api_error(body, status),
        }
    }

    pub fn transport(provider: &str, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Other,
            provider: provider.to_string(),
            status: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = match self.kind {
            FailureKind::Unauthorized => "API key is invalid or not configured",
            FailureKind::Forbidden => "API key lacks permission or the account balance is exhausted",
            FailureKind::RateLimited => "API rate limit exceeded, try again later",
            FailureKind::Other => "request failed",
        };
        write!(f, "{} {}", self.provider, summary)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {})", status)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Pull the human-readable message out of an error envelope such as
/// `{"error": {"message": "...", "code": "..."}}`.
fn parse_api_error(body: &str, status: u16) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|json| {
        json.pointer("/error/message")
            .or_else(|| json.get("message"))
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
    });
    match message {
        Some(message) => message,
        None if body.trim().is_empty() => format!("HTTP {}", status),
        None => body.trim().chars().take(300).collect(),
    }
}

/// HTTP client for the OpenAI-compatible chat-completions endpoint.
pub struct HttpChatClient {
    provider: LlmProvider,
    model: String,
    endpoint: String,
    api_key: String,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl HttpChatClient {
    pub fn new(llm: &ResolvedLlm) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Llm(format!("failed to build tokio runtime: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider: llm.provider,
            model: llm.model.clone(),
            endpoint: format!("{}/chat/completions", llm.base_url.trim_end_matches('/')),
            api_key: llm.api_key.clone(),
            runtime,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Llm(format!("invalid auth header: {e}")))?,
        );
        Ok(headers)
    }
}

impl ChatClient for HttpChatClient {
    fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let provider = self.provider.as_str();
        let headers = self.headers()?;
        tracing::debug!(provider, model = %self.model, endpoint = %self.endpoint, "Sending chat request");

        self.runtime.block_on(async {
            let resp = self
                .http
                .post(&self.endpoint)
                .headers(headers)
                .json(&json!({
                    "model": self.model,
                    "messages": [
                        { "role": "system", "content": request.system },
                        { "role": "user", "content": request.user }
                    ],
                    "temperature": request.temperature,
                    "max_tokens": request.max_tokens,
                }))
                .send()
                .await
                .map_err(|e| {
                    let detail = if e.is_timeout() {
                        "request timed out".to_string()
                    } else {
                        e.to_string()
                    };
                    Error::Provider(ProviderFailure::transport(provider, detail))
                })?;

            let status = resp.status();
            let body = resp.text().await.map_err(|e| {
                Error::Provider(ProviderFailure::transport(
                    provider,
                    format!("failed to read response body: {e}"),
                ))
            })?;

            if !status.is_success() {
                let failure = ProviderFailure::from_status(provider, status.as_u16(), &body);
                tracing::warn!(provider, status = status.as_u16(), kind = ?failure.kind, "Provider rejected request");
                return Err(Error::Provider(failure));
            }

            let json: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
                Error::Provider(ProviderFailure::transport(
                    provider,
                    format!("response is not JSON: {e}"),
                ))
            })?;
            let content = json
                .pointer("/choices/0/message/content")
                .and_then(|v| v.as_str())
                .map(ToString::to_string)
                .ok_or_else(|| {
                    Error::Provider(ProviderFailure::transport(
                        provider,
                        "response missing choices[0].message.content",
                    ))
                })?;
            let usage = json
                .get("usage")
                .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());
            let model = json
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or(self.model.as_str())
                .to_string();

            Ok(ChatCompletion {
                content,
                usage,
                model,
            })
        })
    }

    fn provider_name(&self) -> &str {
        self.provider.as_str()
    }
}
