//! Configuration management

pub mod commands;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::translate::normalize::ReplaceRule;
use crate::translate::requester::{BackendConfig, BackendKind, GenerationParams};

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_NAME: &str = "tlweave";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub translation: TranslationConfig,

    #[serde(default)]
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Output directory used when `-o` is not given
    #[serde(default)]
    pub output_dir: Option<String>,

    /// Print a short source/target table per finished batch
    #[serde(default = "default_true")]
    pub batch_table: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            batch_table: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// openai, anthropic, google or local
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Credentials, used round-robin
    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default)]
    pub api_base: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default)]
    pub presence_penalty: f32,

    #[serde(default)]
    pub frequency_penalty: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_backend() -> String {
    "openai".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.3
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_output_tokens() -> u32 {
    4096
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            api_keys: Vec::new(),
            api_base: None,
            model: None,
            request_timeout_secs: default_timeout(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default = "default_source_language")]
    pub source_language: String,

    #[serde(default = "default_target_language")]
    pub target_language: String,

    #[serde(default = "default_token_limit")]
    pub token_limit: usize,

    /// 0 = ask the backend, falling back to 4
    #[serde(default)]
    pub concurrency: usize,

    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Replaces the default instruction body of the prompt
    #[serde(default)]
    pub custom_prompt: Option<String>,

    #[serde(default)]
    pub auto_glossary: bool,

    #[serde(default)]
    pub traditional_chinese: bool,

    /// Sleep after responses whose prompt used at least this many tokens (0 = off)
    #[serde(default)]
    pub pause_prompt_tokens: u64,

    #[serde(default)]
    pub pause_secs: u64,

    #[serde(default = "default_singleton_retry_threshold")]
    pub singleton_retry_threshold: u32,

    /// Overrides the round after which whole-batch similarity checks stop
    #[serde(default)]
    pub similarity_round_cutoff: Option<usize>,

    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
}

fn default_source_language() -> String {
    "ja".to_string()
}

fn default_target_language() -> String {
    "zh".to_string()
}

fn default_token_limit() -> usize {
    384
}

fn default_max_rounds() -> usize {
    16
}

fn default_singleton_retry_threshold() -> u32 {
    1
}

fn default_save_interval() -> u64 {
    15
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            source_language: default_source_language(),
            target_language: default_target_language(),
            token_limit: default_token_limit(),
            concurrency: 0,
            max_rounds: default_max_rounds(),
            custom_prompt: None,
            auto_glossary: false,
            traditional_chinese: false,
            pause_prompt_tokens: 0,
            pause_secs: 0,
            singleton_retry_threshold: default_singleton_retry_threshold(),
            similarity_round_cutoff: None,
            save_interval_secs: default_save_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RulesConfig {
    /// Ordered `[src, dst]` pairs applied before the request
    #[serde(default)]
    pub pre_replace: Vec<[String; 2]>,

    /// Ordered `[src, dst]` pairs applied to the translation
    #[serde(default)]
    pub post_replace: Vec<[String; 2]>,

    #[serde(default)]
    pub glossary_file: Option<String>,
}

impl RulesConfig {
    pub fn pre_rules(&self) -> Vec<ReplaceRule> {
        to_rules(&self.pre_replace)
    }

    pub fn post_rules(&self) -> Vec<ReplaceRule> {
        to_rules(&self.post_replace)
    }
}

fn to_rules(pairs: &[[String; 2]]) -> Vec<ReplaceRule> {
    pairs
        .iter()
        .filter(|[src, _]| !src.is_empty())
        .map(|[src, dst]| ReplaceRule::new(src, dst))
        .collect()
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Load config from default location
    pub fn load() -> Result<Self> {
        let path = Self::config_path().context("Could not determine config path")?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save config to default location
    pub fn save(&self) -> Result<PathBuf> {
        let dir = Self::config_dir().context("Could not determine config directory")?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = dir.join(CONFIG_FILE_NAME);
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, content).context("Failed to write config file")?;

        Ok(path)
    }

    pub fn backend_kind(&self) -> BackendKind {
        BackendKind::from_str(&self.api.backend)
    }

    /// Configured keys, or the backend's environment variable when none are set
    pub fn api_keys(&self) -> Vec<String> {
        if !self.api.api_keys.is_empty() {
            return self.api.api_keys.clone();
        }
        let var = match self.backend_kind() {
            BackendKind::OpenAI => "OPENAI_API_KEY",
            BackendKind::Anthropic => "ANTHROPIC_API_KEY",
            BackendKind::Google => "GEMINI_API_KEY",
            BackendKind::Local => return Vec::new(),
        };
        std::env::var(var)
            .map(|k| {
                k.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(self.backend_kind())
            .with_api_keys(self.api_keys())
            .with_base_url(self.api.api_base.clone())
            .with_model(self.api.model.clone())
            .with_timeout(Duration::from_secs(self.api.request_timeout_secs))
            .with_max_output_tokens(self.api.max_output_tokens)
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.api.temperature,
            top_p: self.api.top_p,
            presence_penalty: self.api.presence_penalty,
            frequency_penalty: self.api.frequency_penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::parse(
            r#"
[api]
backend = "anthropic"
api_keys = ["a", "b"]

[translation]
token_limit = 512
"#,
        )
        .unwrap();

        assert_eq!(config.backend_kind(), BackendKind::Anthropic);
        assert_eq!(config.api_keys(), vec!["a", "b"]);
        assert_eq!(config.api.request_timeout_secs, 120);
        assert_eq!(config.translation.token_limit, 512);
        assert_eq!(config.translation.max_rounds, 16);
        assert_eq!(config.translation.singleton_retry_threshold, 1);
        assert!(config.general.batch_table);
    }

    #[test]
    fn test_replace_rules() {
        let config = Config::parse(
            r#"
[rules]
pre_replace = [["Mr.", "Mister"], ["", "ignored"]]
post_replace = [["爱丽丝", "艾莉丝"]]
"#,
        )
        .unwrap();

        let pre = config.rules.pre_rules();
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0], ReplaceRule::new("Mr.", "Mister"));
        assert_eq!(config.rules.post_rules().len(), 1);
    }

    #[test]
    fn test_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::parse(&text).unwrap();
        assert_eq!(parsed.translation.token_limit, config.translation.token_limit);
        assert_eq!(parsed.api.backend, config.api.backend);
    }
}
