//! Protects engine control codes at the edges of a line from translation

use once_cell::sync::Lazy;
use regex::Regex;

use super::unit::SourceFormat;

/// Stands in for a line that consisted only of control codes.
pub const CODE_PLACEHOLDER: &str = "[[CODE]]";

/// Visual novel engines: `{i}`, `[name]`, `\n`, `%(var)s`, `<b>`.
const VN_CODE: &str = r#"\{[^{}\n]*\}|\[[^\[\]\n]*\]|\\n|%\([^)\n]*\)[sdf]|%[sdf]|</?[A-Za-z][^<>\n]*>"#;

/// Bracket/brace engines: `\C[1]`, `\N<name>`, `\{`, `\.`, `\|`, `\G`, `<tag>`.
const BRACKET_CODE: &str = r#"\\[A-Za-z]+\[[^\]\n]*\]|\\[A-Za-z]+<[^>\n]*>|\\[{}\\$.|!><^]|\\[A-Za-z]+|<[^<>\n]+>"#;

struct Grammar {
    prefix: Regex,
    suffix: Regex,
}

impl Grammar {
    fn build(code: &str) -> Self {
        Self {
            prefix: Regex::new(&format!(r"^(?:\s|{})+", code)).unwrap(),
            suffix: Regex::new(&format!(r"(?:\s|{})+$", code)).unwrap(),
        }
    }
}

static VN_GRAMMAR: Lazy<Grammar> = Lazy::new(|| Grammar::build(VN_CODE));
static BRACKET_GRAMMAR: Lazy<Grammar> = Lazy::new(|| Grammar::build(BRACKET_CODE));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeGrammar {
    VisualNovel,
    BracketEngine,
}

impl CodeGrammar {
    pub fn for_format(format: SourceFormat) -> Self {
        match format {
            SourceFormat::ScriptEngine | SourceFormat::KeyValueJson | SourceFormat::MessageJson => {
                Self::BracketEngine
            }
            _ => Self::VisualNovel,
        }
    }

    fn grammar(self) -> &'static Grammar {
        match self {
            Self::VisualNovel => &VN_GRAMMAR,
            Self::BracketEngine => &BRACKET_GRAMMAR,
        }
    }
}

/// A sub-line with its leading and trailing code runs lifted out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedLine {
    pub text: String,
    pub prefix: String,
    pub suffix: String,
}

impl ProtectedLine {
    pub fn protect(line: &str, grammar: CodeGrammar) -> Self {
        let g = grammar.grammar();

        let prefix = g
            .prefix
            .find(line)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let rest = &line[prefix.len()..];

        let suffix = g
            .suffix
            .find(rest)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let body = &rest[..rest.len() - suffix.len()];

        let text = if body.is_empty() {
            CODE_PLACEHOLDER.to_string()
        } else {
            body.to_string()
        };

        Self {
            text,
            prefix,
            suffix,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.text == CODE_PLACEHOLDER
    }

    /// Reattaches the lifted spans around `translated`.
    pub fn restore(&self, translated: &str) -> String {
        let body = if self.is_placeholder() {
            translated.replace(CODE_PLACEHOLDER, "").trim().to_string()
        } else {
            translated.to_string()
        };
        format!("{}{}{}", self.prefix, body, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vn_tags_at_edges() {
        let line = ProtectedLine::protect("{i}Hello there{/i}", CodeGrammar::VisualNovel);
        assert_eq!(line.prefix, "{i}");
        assert_eq!(line.text, "Hello there");
        assert_eq!(line.suffix, "{/i}");
        assert_eq!(line.restore("你好"), "{i}你好{/i}");
    }

    #[test]
    fn test_inner_codes_stay_in_text() {
        let line = ProtectedLine::protect("Hi [player], welcome", CodeGrammar::VisualNovel);
        assert_eq!(line.prefix, "");
        assert_eq!(line.text, "Hi [player], welcome");
    }

    #[test]
    fn test_bracket_engine_codes() {
        let line = ProtectedLine::protect(r"\C[2]\N[1]こんにちは\C[0]", CodeGrammar::BracketEngine);
        assert_eq!(line.prefix, r"\C[2]\N[1]");
        assert_eq!(line.text, "こんにちは");
        assert_eq!(line.suffix, r"\C[0]");
    }

    #[test]
    fn test_code_only_line_uses_placeholder() {
        let line = ProtectedLine::protect(r"\C[1]\.", CodeGrammar::BracketEngine);
        assert!(line.is_placeholder());
        assert_eq!(line.restore(CODE_PLACEHOLDER), r"\C[1]\.");
    }

    #[test]
    fn test_grammar_selection() {
        assert_eq!(
            CodeGrammar::for_format(SourceFormat::ScriptEngine),
            CodeGrammar::BracketEngine
        );
        assert_eq!(
            CodeGrammar::for_format(SourceFormat::RenPy),
            CodeGrammar::VisualNovel
        );
    }
}
