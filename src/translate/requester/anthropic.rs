//! Messages-style backend (Anthropic API)

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{
    BackendConfig, GenerationParams, KeyRing, RequestError, RequestResult, Requester,
    check_status, http_client, settle,
};
use crate::translate::prompt::Message;

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<&'a Message>,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub struct AnthropicRequester {
    config: BackendConfig,
    keys: KeyRing,
    client: reqwest::blocking::Client,
}

impl AnthropicRequester {
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
        let key = self.keys.next_key().ok_or(RequestError::MissingKey)?;

        // System turns travel in a dedicated field on this API.
        let system = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns: Vec<&Message> = messages.iter().filter(|m| m.role != "system").collect();

        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_output_tokens,
            system,
            messages: turns,
            temperature: params.temperature,
            top_p: params.top_p,
        };

        let url = format!("{}/messages", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()?;
        let body: MessagesResponse = check_status(response)?.json()?;

        let mut thinking = String::new();
        let mut result = String::new();
        for block in body.content {
            match block.kind.as_str() {
                "thinking" => thinking.push_str(block.thinking.as_deref().unwrap_or("")),
                "text" => result.push_str(block.text.as_deref().unwrap_or("")),
                _ => {}
            }
        }
        if result.is_empty() {
            return Err(RequestError::Decode("no text block in response".to_string()));
        }

        Ok(RequestResult {
            should_skip: false,
            thinking,
            result: result.trim().to_string(),
            prompt_tokens: body.usage.input_tokens,
            completion_tokens: body.usage.output_tokens,
        })
    }
}

impl Requester for AnthropicRequester {
    fn name(&self) -> &str {
        "anthropic"
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
