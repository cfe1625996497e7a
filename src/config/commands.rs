//! Config command handlers

use anyhow::{Context, Result};
use colored::Colorize;

use super::Config;
use crate::cli::{ConfigAction, ConfigArgs};

pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => show_config(),
        ConfigAction::Init { force } => init_config(force),
        ConfigAction::Set { key, value } => set_config(&key, &value),
        ConfigAction::Get { key } => get_config(&key),
        ConfigAction::Path => show_path(),
        ConfigAction::Edit => edit_config(),
    }
}

fn show_config() -> Result<()> {
    let mut config = Config::load()?;
    config.api.api_keys = config.api.api_keys.iter().map(|k| mask_key(k)).collect();
    let content = toml::to_string_pretty(&config)?;

    println!("{}", "[Config]".green());
    println!("{}", content);

    Ok(())
}

fn init_config(force: bool) -> Result<()> {
    let path = Config::config_path().context("Could not determine config path")?;

    if path.exists() && !force {
        println!(
            "{}",
            format!("Config file already exists: {}", path.display()).yellow()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    let saved_path = config.save()?;

    println!("{}", "[Config] Initialized".green());
    println!("  Created: {}", saved_path.display());
    println!();
    println!("Add your API keys:");
    println!("  tlweave config set api.api_keys sk-one,sk-two");

    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", key, value))
}

/// Applies one `section.field` assignment to `config`.
pub fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "output_dir"] => config.general.output_dir = optional(value),
        ["general", "batch_table"] => config.general.batch_table = parse_value(key, value)?,
        ["api", "backend"] => config.api.backend = value.to_string(),
        ["api", "api_keys"] => {
            config.api.api_keys = value
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        ["api", "api_base"] => config.api.api_base = optional(value),
        ["api", "model"] => config.api.model = optional(value),
        ["api", "request_timeout_secs"] => {
            config.api.request_timeout_secs = parse_value(key, value)?
        }
        ["api", "temperature"] => config.api.temperature = parse_value(key, value)?,
        ["api", "top_p"] => config.api.top_p = parse_value(key, value)?,
        ["api", "presence_penalty"] => config.api.presence_penalty = parse_value(key, value)?,
        ["api", "frequency_penalty"] => config.api.frequency_penalty = parse_value(key, value)?,
        ["api", "max_output_tokens"] => config.api.max_output_tokens = parse_value(key, value)?,
        ["translation", "source_language"] => {
            config.translation.source_language = value.to_string()
        }
        ["translation", "target_language"] => {
            config.translation.target_language = value.to_string()
        }
        ["translation", "token_limit"] => config.translation.token_limit = parse_value(key, value)?,
        ["translation", "concurrency"] => config.translation.concurrency = parse_value(key, value)?,
        ["translation", "max_rounds"] => config.translation.max_rounds = parse_value(key, value)?,
        ["translation", "custom_prompt"] => config.translation.custom_prompt = optional(value),
        ["translation", "auto_glossary"] => {
            config.translation.auto_glossary = parse_value(key, value)?
        }
        ["translation", "traditional_chinese"] => {
            config.translation.traditional_chinese = parse_value(key, value)?
        }
        ["translation", "pause_prompt_tokens"] => {
            config.translation.pause_prompt_tokens = parse_value(key, value)?
        }
        ["translation", "pause_secs"] => config.translation.pause_secs = parse_value(key, value)?,
        ["translation", "singleton_retry_threshold"] => {
            config.translation.singleton_retry_threshold = parse_value(key, value)?
        }
        ["translation", "similarity_round_cutoff"] => {
            config.translation.similarity_round_cutoff = if value.is_empty() {
                None
            } else {
                Some(parse_value(key, value)?)
            }
        }
        ["translation", "save_interval_secs"] => {
            config.translation.save_interval_secs = parse_value(key, value)?
        }
        ["rules", "glossary_file"] => config.rules.glossary_file = optional(value),
        _ => {
            anyhow::bail!("Unknown config key: {}", key);
        }
    }
    Ok(())
}

fn set_config(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?;
    apply_setting(&mut config, key, value)?;
    config.save()?;
    println!("{}", format!("[Config] Set {} = {}", key, value).green());

    Ok(())
}

/// Reads one `section.field` value; `None` when unset.
pub fn read_setting(config: &Config, key: &str) -> Result<Option<String>> {
    let parts: Vec<&str> = key.split('.').collect();
    let c = config;

    let value = match parts.as_slice() {
        ["general", "output_dir"] => c.general.output_dir.clone(),
        ["general", "batch_table"] => Some(c.general.batch_table.to_string()),
        ["api", "backend"] => Some(c.api.backend.clone()),
        ["api", "api_keys"] => (!c.api.api_keys.is_empty()).then(|| {
            c.api
                .api_keys
                .iter()
                .map(|k| mask_key(k))
                .collect::<Vec<_>>()
                .join(",")
        }),
        ["api", "api_base"] => c.api.api_base.clone(),
        ["api", "model"] => c.api.model.clone(),
        ["api", "request_timeout_secs"] => Some(c.api.request_timeout_secs.to_string()),
        ["api", "temperature"] => Some(c.api.temperature.to_string()),
        ["api", "top_p"] => Some(c.api.top_p.to_string()),
        ["api", "presence_penalty"] => Some(c.api.presence_penalty.to_string()),
        ["api", "frequency_penalty"] => Some(c.api.frequency_penalty.to_string()),
        ["api", "max_output_tokens"] => Some(c.api.max_output_tokens.to_string()),
        ["translation", "source_language"] => Some(c.translation.source_language.clone()),
        ["translation", "target_language"] => Some(c.translation.target_language.clone()),
        ["translation", "token_limit"] => Some(c.translation.token_limit.to_string()),
        ["translation", "concurrency"] => Some(c.translation.concurrency.to_string()),
        ["translation", "max_rounds"] => Some(c.translation.max_rounds.to_string()),
        ["translation", "custom_prompt"] => c.translation.custom_prompt.clone(),
        ["translation", "auto_glossary"] => Some(c.translation.auto_glossary.to_string()),
        ["translation", "traditional_chinese"] => {
            Some(c.translation.traditional_chinese.to_string())
        }
        ["translation", "pause_prompt_tokens"] => {
            Some(c.translation.pause_prompt_tokens.to_string())
        }
        ["translation", "pause_secs"] => Some(c.translation.pause_secs.to_string()),
        ["translation", "singleton_retry_threshold"] => {
            Some(c.translation.singleton_retry_threshold.to_string())
        }
        ["translation", "similarity_round_cutoff"] => c
            .translation
            .similarity_round_cutoff
            .map(|v| v.to_string()),
        ["translation", "save_interval_secs"] => {
            Some(c.translation.save_interval_secs.to_string())
        }
        ["rules", "glossary_file"] => c.rules.glossary_file.clone(),
        _ => {
            anyhow::bail!("Unknown config key: {}", key);
        }
    };
    Ok(value)
}

fn get_config(key: &str) -> Result<()> {
    let config = Config::load()?;

    match read_setting(&config, key)? {
        Some(v) => println!("{} = {}", key, v),
        None => println!("{} = (not set)", key),
    }

    Ok(())
}

fn show_path() -> Result<()> {
    match Config::config_path() {
        Some(path) => {
            println!("{}", path.display());
            if path.exists() {
                println!("{}", "(exists)".green());
            } else {
                println!("{}", "(not created)".yellow());
            }
        }
        None => {
            println!("{}", "Could not determine config path".red());
        }
    }
    Ok(())
}

fn edit_config() -> Result<()> {
    let path = Config::config_path().context("Could not determine config path")?;

    if !path.exists() {
        let config = Config::default();
        config.save()?;
        println!("{}", "[Config] Created default config".green());
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| {
            if cfg!(windows) {
                "notepad".to_string()
            } else {
                "nano".to_string()
            }
        });

    println!("Opening config with: {}", editor);
    println!("Path: {}", path.display());

    std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .context(format!("Failed to open editor: {}", editor))?;

    Ok(())
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        apply_setting(&mut config, "translation.token_limit", "256").unwrap();
        apply_setting(&mut config, "api.api_keys", "sk-aaaaaaaaaa, sk-bbbbbbbbbb").unwrap();
        apply_setting(&mut config, "translation.similarity_round_cutoff", "5").unwrap();

        assert_eq!(config.translation.token_limit, 256);
        assert_eq!(config.api.api_keys.len(), 2);
        assert_eq!(
            read_setting(&config, "translation.similarity_round_cutoff").unwrap(),
            Some("5".to_string())
        );
        assert_eq!(
            read_setting(&config, "api.api_keys").unwrap(),
            Some("sk-a...aaaa,sk-b...bbbb".to_string())
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply_setting(&mut config, "translation.max_rounds", "many").is_err());
        assert!(apply_setting(&mut config, "nope.key", "1").is_err());
        assert!(read_setting(&config, "nope.key").is_err());
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("short"), "*****");
        assert_eq!(mask_key("sk-1234567890"), "sk-1...7890");
    }
}
