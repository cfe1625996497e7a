//! Source text normalization and literal replacement rules

use serde::{Deserialize, Serialize};

/// Splits a unit's source into sub-lines on line breaks.
pub fn split_sublines(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n");
    text.split('\n').map(|s| s.to_string()).collect()
}

/// Removes control characters and folds exotic spaces into ASCII space.
/// Leading/trailing whitespace is preserved so code spans keep their layout.
pub fn normalize_line(line: &str) -> String {
    line.chars()
        .filter_map(|c| match c {
            '\t' => Some('\t'),
            '\u{00A0}' | '\u{2002}' | '\u{2003}' | '\u{2009}' | '\u{200A}' | '\u{202F}' => {
                Some(' ')
            }
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceRule {
    pub src: String,
    pub dst: String,
}

impl ReplaceRule {
    pub fn new(src: &str, dst: &str) -> Self {
        Self {
            src: src.to_string(),
            dst: dst.to_string(),
        }
    }
}

/// Applies literal rules in list order; text produced by an earlier rule is
/// visible to later ones, so the first matching rule wins on overlaps.
pub fn apply_rules(text: &str, rules: &[ReplaceRule]) -> String {
    let mut result = text.to_string();
    for rule in rules {
        if rule.src.is_empty() {
            continue;
        }
        if result.contains(&rule.src) {
            result = result.replace(&rule.src, &rule.dst);
        }
    }
    result
}
