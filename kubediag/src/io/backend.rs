//! Reasoning backend abstraction and an OpenAI-compatible implementation.
//!
//! The backend is stateless between calls: every [`ReasoningBackend::advance`]
//! receives the full transcript and returns one new assistant message.
//! Failures are reported as a typed [`BackendError`] so the loop can count
//! them separately from everything else.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::types::Message;

/// Abstraction over the reasoning service.
pub trait ReasoningBackend {
    /// Send the full transcript and return the next assistant message text.
    fn advance(&self, transcript: &[Message]) -> Result<String, BackendError>;
}

/// Classification of backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    Server,
    /// Other HTTP 4xx, including authentication failures.
    Client,
    /// Connection failure or request timeout.
    Network,
    /// The response body was not a usable completion.
    Parse,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::RateLimited => write!(f, "Rate limited"),
            BackendErrorKind::Server => write!(f, "Server error"),
            BackendErrorKind::Client => write!(f, "Client error"),
            BackendErrorKind::Network => write!(f, "Network error"),
            BackendErrorKind::Parse => write!(f, "Parse error"),
        }
    }
}

/// Error from a reasoning backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub kind: BackendErrorKind,
    /// HTTP status code, if the server answered.
    pub status_code: Option<u16>,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn http(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: classify_http_status(status_code),
            status_code: Some(status_code),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Parse, message)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for BackendError {}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> BackendErrorKind {
    match status {
        429 => BackendErrorKind::RateLimited,
        400..=499 => BackendErrorKind::Client,
        _ => BackendErrorKind::Server,
    }
}

/// Connection settings for [`OpenAiBackend`].
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// Base URL up to and excluding `/chat/completions`.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub api_key: String,
    pub request_timeout: Duration,
}

/// Blocking client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: String,
}

impl OpenAiBackend {
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                settings.base_url.trim_end_matches('/')
            ),
            model: settings.model,
            temperature: settings.temperature,
            api_key: settings.api_key,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ReasoningBackend for OpenAiBackend {
    #[instrument(skip_all, fields(model = %self.model, messages = transcript.len()))]
    fn advance(&self, transcript: &[Message]) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: transcript
                .iter()
                .map(|message| WireMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
        };

        debug!(endpoint = %self.endpoint, "sending chat completion request");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|err| BackendError::network(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|err| BackendError::network(format!("read response body: {err}")))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "chat completion request failed");
            return Err(BackendError::http(status.as_u16(), truncate(&text, 500)));
        }

        parse_completion(&text)
    }
}

/// Extract the assistant text from a chat completion response body.
pub fn parse_completion(body: &str) -> Result<String, BackendError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|err| BackendError::parse(format!("invalid completion json: {err}")))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::parse("completion has no choices"))?
        .message
        .content
        .unwrap_or_default();
    Ok(content.trim().to_string())
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
