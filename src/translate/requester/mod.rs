//! LLM backends behind a single request contract

pub mod anthropic;
pub mod google;
pub mod local;
pub mod openai;

use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::prompt::Message;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_p: 0.95,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

/// Raised penalty floor for retry rounds, against repetition loops.
pub const RETRY_FREQUENCY_PENALTY_FLOOR: f32 = 0.20;

impl GenerationParams {
    pub fn for_round(&self, round: usize) -> Self {
        let mut params = *self;
        if round >= 1 {
            params.frequency_penalty = params.frequency_penalty.max(RETRY_FREQUENCY_PENALTY_FLOOR);
        }
        params
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestResult {
    /// Transport/provider failure; the batch counts as failed
    pub should_skip: bool,
    pub thinking: String,
    pub result: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl RequestResult {
    pub fn skipped() -> Self {
        Self {
            should_skip: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API request failed ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("Unexpected response shape: {0}")]
    Decode(String),
    #[error("No API key configured")]
    MissingKey,
}

pub trait Requester: Send + Sync {
    fn name(&self) -> &str;

    fn request(&self, messages: &[Message], round: usize, params: &GenerationParams)
    -> RequestResult;

    /// Number of parallel slots the backend reports, if it can tell.
    fn probe_capacity(&self) -> Option<usize> {
        None
    }
}

/// Converts a backend call result into the skip-on-failure contract.
pub(crate) fn settle(backend: &str, result: Result<RequestResult, RequestError>) -> RequestResult {
    match result {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(backend, "Request failed: {}", e);
            RequestResult::skipped()
        }
    }
}

/// Round-robin credential pool shared by all workers.
#[derive(Debug, Default)]
pub struct KeyRing {
    keys: Vec<String>,
    next: Mutex<usize>,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keys,
            next: Mutex::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Next key in rotation.
    pub fn next_key(&self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let mut next = self.next.lock();
        let key = self.keys[*next % self.keys.len()].clone();
        *next = (*next + 1) % self.keys.len();
        Some(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenAI,
    Anthropic,
    Google,
    Local,
}

impl BackendKind {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "claude" | "anthropic" => Self::Anthropic,
            "google" | "gemini" => Self::Google,
            "local" | "sakura" | "llamacpp" | "llama.cpp" => Self::Local,
            _ => Self::OpenAI,
        }
    }

    pub fn default_base_url(&self) -> &str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta",
            Self::Local => "http://localhost:8080",
        }
    }

    pub fn default_model(&self) -> &str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::Google => "gemini-2.0-flash",
            Self::Local => "sakura",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub api_keys: Vec<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_output_tokens: u32,
}

impl BackendConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            api_keys: Vec::new(),
            base_url: kind.default_base_url().to_string(),
            model: kind.default_model().to_string(),
            timeout: Duration::from_secs(120),
            max_output_tokens: 4096,
        }
    }

    pub fn with_api_keys(mut self, keys: Vec<String>) -> Self {
        self.api_keys = keys;
        self
    }

    pub fn with_base_url(mut self, url: Option<String>) -> Self {
        if let Some(u) = url {
            self.base_url = u.trim_end_matches('/').to_string();
        }
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(m) = model {
            self.model = m;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens.max(1);
        self
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Reads the body of a failed response into a [`RequestError::Status`].
pub(crate) fn check_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, RequestError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    Err(RequestError::Status { status, body })
}

/// Splits `<think>...</think>` reasoning off the front of a completion.
pub(crate) fn split_thinking(text: &str) -> (String, String) {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<think>")
        && let Some(end) = rest.find("</think>")
    {
        let thinking = rest[..end].trim().to_string();
        let result = rest[end + "</think>".len()..].trim().to_string();
        return (thinking, result);
    }
    (String::new(), text.trim().to_string())
}

/// Builds the configured backend.
pub fn build(config: BackendConfig) -> Result<Box<dyn Requester>> {
    let requester: Box<dyn Requester> = match config.kind {
        BackendKind::OpenAI => Box::new(openai::OpenAIRequester::new(config)?),
        BackendKind::Anthropic => Box::new(anthropic::AnthropicRequester::new(config)?),
        BackendKind::Google => Box::new(google::GoogleRequester::new(config)?),
        BackendKind::Local => Box::new(local::LocalRequester::new(config)?),
    };
    Ok(requester)
}
