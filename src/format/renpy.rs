//! Ren'Py scripts: dialogue, narration and menu choices

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

use super::{FileAdapter, has_extension, output_path};
use crate::translate::unit::{SourceFormat, TranslationUnit};
use crate::utils::is_code_like;

const QUOTED: &str = r#"("[^"\\]*(?:\\.[^"\\]*)*"|'[^'\\]*(?:\\.[^'\\]*)*')"#;

static DIALOGUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r#"^\s*(\w+)\s+{}"#, QUOTED)).unwrap());
static NARRATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r#"^\s*{}\s*$"#, QUOTED)).unwrap());
static MENU: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r#"^\s*{}\s*:"#, QUOTED)).unwrap());

/// Statement prefixes that never carry player-visible text.
const KEYWORDS: &[&str] = &[
    "label ", "jump ", "call ", "return", "pass", "menu:", "if ", "elif ", "else:", "for ",
    "while ", "$", "python:", "init ", "define ", "default ", "image ", "transform ", "screen ",
    "style ", "show ", "hide ", "scene ", "with ", "play ", "stop ", "queue ", "voice ", "nvl ",
    "window ", "pause", "translate ", "old ", "new ",
];

fn is_keyword(line: &str) -> bool {
    KEYWORDS.iter().any(|k| line.starts_with(k))
}

#[derive(Debug, Clone, PartialEq)]
struct Literal {
    speaker: Option<String>,
    /// Contents between the quotes, escapes kept as written
    raw: String,
    quote: char,
}

fn find_literal(line: &str) -> Option<Literal> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || is_keyword(trimmed) {
        return None;
    }

    let (speaker, quoted) = if let Some(caps) = DIALOGUE.captures(line) {
        (caps.get(1).map(|m| m.as_str().to_string()), caps.get(2)?.as_str())
    } else if let Some(caps) = MENU.captures(line) {
        (None, caps.get(1)?.as_str())
    } else if let Some(caps) = NARRATION.captures(line) {
        (None, caps.get(1)?.as_str())
    } else {
        return None;
    };

    let quote = quoted.chars().next()?;
    let raw = quoted[1..quoted.len() - 1].to_string();
    if raw.trim().is_empty() || is_code_like(&raw) {
        return None;
    }
    Some(Literal {
        speaker,
        raw,
        quote,
    })
}

/// Escapes `text` for a literal delimited by `quote`.
fn escape_for(text: &str, quote: char) -> String {
    let escaped = format!("\\{}", quote);
    let plain = text.replace(&escaped, &quote.to_string());
    plain.replace(quote, &escaped).replace('\n', "\\n")
}

pub struct RenpyAdapter;

impl RenpyAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RenpyAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FileAdapter for RenpyAdapter {
    fn name(&self) -> &str {
        "renpy"
    }

    fn handles(&self, rel_path: &str) -> bool {
        has_extension(rel_path, "rpy")
    }

    fn read_units(&self, root: &Path, rel_path: &str) -> Result<Vec<TranslationUnit>> {
        let content =
            fs::read_to_string(root.join(rel_path)).context("Failed to read script file")?;

        let mut units = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if let Some(lit) = find_literal(line) {
                let mut unit = TranslationUnit::new(rel_path, i, &lit.raw)
                    .with_format(SourceFormat::RenPy);
                unit.auxiliary_source = lit.speaker.unwrap_or_default();
                units.push(unit);
            }
        }
        Ok(units)
    }

    fn write_units(
        &self,
        input_root: &Path,
        output_root: &Path,
        rel_path: &str,
        units: &[TranslationUnit],
    ) -> Result<()> {
        let content =
            fs::read_to_string(input_root.join(rel_path)).context("Failed to read script file")?;
        let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();

        for unit in units {
            let Some(line) = lines.get_mut(unit.sequence_index) else {
                continue;
            };
            let Some(lit) = find_literal(line) else {
                tracing::warn!(file = %rel_path, line = unit.sequence_index + 1, "literal not found on write-back");
                continue;
            };
            let from = format!("{q}{}{q}", lit.raw, q = lit.quote);
            let to = format!("{q}{}{q}", escape_for(unit.output_text(), lit.quote), q = lit.quote);
            *line = line.replacen(&from, &to, 1);
        }

        let mut out = lines.join("\n");
        if content.ends_with('\n') {
            out.push('\n');
        }
        fs::write(output_path(output_root, rel_path)?, out).context("Failed to write script file")
    }
}
