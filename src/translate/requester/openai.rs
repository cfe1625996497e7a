//! OpenAI-style chat completion backend

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{
    BackendConfig, GenerationParams, KeyRing, RequestError, RequestResult, Requester,
    check_status, http_client, settle, split_thinking,
};
use crate::translate::prompt::Message;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub struct OpenAIRequester {
    config: BackendConfig,
    keys: KeyRing,
    client: reqwest::blocking::Client,
}

impl OpenAIRequester {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        let keys = KeyRing::new(config.api_keys.clone());
        Ok(Self {
            config,
            keys,
            client,
        })
    }

    fn call(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<RequestResult, RequestError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            max_tokens: self.config.max_output_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        let mut req = self.client.post(&url).json(&request);
        if let Some(key) = self.keys.next_key() {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = check_status(req.send()?)?;
        let body: ChatResponse = response.json()?;

        let message = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| RequestError::Decode("no choices in response".to_string()))?;

        let (inline_thinking, result) = split_thinking(message.content.as_deref().unwrap_or(""));
        let thinking = message
            .reasoning_content
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(inline_thinking);
        let usage = body.usage.unwrap_or_default();

        Ok(RequestResult {
            should_skip: false,
            thinking,
            result,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

impl Requester for OpenAIRequester {
    fn name(&self) -> &str {
        "openai"
    }

    fn request(
        &self,
        messages: &[Message],
        _round: usize,
        params: &GenerationParams,
    ) -> RequestResult {
        settle(self.name(), self.call(messages, params))
    }
}
