//! Generate-content style backend (Gemini API)

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{
    BackendConfig, GenerationParams, KeyRing, RequestError, RequestResult, Requester,
    check_status, http_client, settle,
};
use crate::translate::prompt::Message;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    thought: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

pub struct GoogleRequester {
    config: BackendConfig,
    keys: KeyRing,
    client: reqwest::blocking::Client,
}

impl GoogleRequester {
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

        let system_text = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        let system_instruction = (!system_text.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: system_text,
                thought: false,
            }],
        });

        let contents = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| Content {
                role: Some(if m.role == "assistant" { "model" } else { "user" }.to_string()),
                parts: vec![Part {
                    text: m.content.clone(),
                    thought: false,
                }],
            })
            .collect();

        let request = GenerateRequest {
            system_instruction,
            contents,
            generation_config: GenerationConfig {
                temperature: params.temperature,
                top_p: params.top_p,
                presence_penalty: params.presence_penalty,
                frequency_penalty: params.frequency_penalty,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&request)
            .send()?;
        let body: GenerateResponse = check_status(response)?.json()?;

        let candidate = body
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| RequestError::Decode("no candidates in response".to_string()))?;

        let mut thinking = String::new();
        let mut result = String::new();
        for part in candidate.content.parts {
            if part.thought {
                thinking.push_str(&part.text);
            } else {
                result.push_str(&part.text);
            }
        }

        Ok(RequestResult {
            should_skip: false,
            thinking,
            result: result.trim().to_string(),
            prompt_tokens: body.usage_metadata.prompt_token_count,
            completion_tokens: body.usage_metadata.candidates_token_count,
        })
    }
}

impl Requester for GoogleRequester {
    fn name(&self) -> &str {
        "google"
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
