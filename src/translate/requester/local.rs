//! Local llama.cpp server backend for fine-tuned translation models

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{
    BackendConfig, GenerationParams, RequestError, RequestResult, Requester, check_status,
    http_client, settle, split_thinking,
};
use crate::translate::prompt::Message;

#[derive(Debug, Serialize)]
struct CompletionRequest {
    prompt: String,
    temperature: f32,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    n_predict: u32,
    stream: bool,
    cache_prompt: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
    #[serde(default)]
    tokens_evaluated: u64,
    #[serde(default)]
    tokens_predicted: u64,
}

pub struct LocalRequester {
    config: BackendConfig,
    client: reqwest::blocking::Client,
}

impl LocalRequester {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { config, client })
    }

    fn call(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<RequestResult, RequestError> {
        let request = CompletionRequest {
            prompt: render_chatml(messages),
            temperature: params.temperature,
            top_p: params.top_p,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            n_predict: self.config.max_output_tokens,
            stream: false,
            cache_prompt: true,
        };

        let url = format!("{}/completion", self.config.base_url);
        let response = self.client.post(&url).json(&request).send()?;
        let body: CompletionResponse = check_status(response)?.json()?;

        let (thinking, result) = split_thinking(&body.content);
        Ok(RequestResult {
            should_skip: false,
            thinking,
            result,
            prompt_tokens: body.tokens_evaluated,
            completion_tokens: body.tokens_predicted,
        })
    }
}

/// ChatML rendering used by most fine-tuned translation models.
pub fn render_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for m in messages {
        prompt.push_str(&format!("<|im_start|>{}\n{}<|im_end|>\n", m.role, m.content));
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

impl Requester for LocalRequester {
    fn name(&self) -> &str {
        "local"
    }

    fn request(
        &self,
        messages: &[Message],
        _round: usize,
        params: &GenerationParams,
    ) -> RequestResult {
        settle(self.name(), self.call(messages, params))
    }

    fn probe_capacity(&self) -> Option<usize> {
        let url = format!("{}/slots", self.config.base_url);
        let response = self.client.get(&url).send().ok()?;
        if !response.status().is_success() {
            return None;
        }
        let slots: Vec<serde_json::Value> = response.json().ok()?;
        (!slots.is_empty()).then_some(slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_chatml() {
        let prompt = render_chatml(&[Message::system("sys"), Message::user("hi")]);
        assert_eq!(
            prompt,
            "<|im_start|>system\nsys<|im_end|>\n<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\n"
        );
    }
}
