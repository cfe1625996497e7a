//! Builds the outbound message list for one batch

use serde::{Deserialize, Serialize};

use super::glossary::Glossary;
use super::response::GLOSSARY_MARKER;

const PREFIX: &str = "You are a professional localization translator for games, subtitles and books. \
Translate the {{source_lang}} text in the user's JSON object into {{target_lang}}.";

const DEFAULT_BODY: &str = "Rules:\n\
1. Keep every key unchanged and output exactly one value per key, in the same order.\n\
2. Preserve formatting codes such as {color}, [variables], \\C[1], <tags> and the token [[CODE]] exactly.\n\
3. Keep the original tone, register and line breaks.\n\
4. Translate every line; never leave source text untranslated and never add commentary.";

const SUFFIX: &str = "Output ONLY a JSON object of the form {\"0\": \"translation\", ...}.";

const GLOSSARY_REQUEST: &str = "After the JSON object, output a line containing {{marker}} followed by a JSON object \
mapping every character name you translated to {\"dst\": \"translation\", \"info\": \"male name | female name | role\"}.";

const CONTEXT_HEADER: &str = "Preceding lines, for context only (do not translate):";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    pub source_lang: String,
    pub target_lang: String,
    pub custom_body: Option<String>,
    pub request_glossary: bool,
}

impl PromptBuilder {
    pub fn new(source_lang: &str, target_lang: &str) -> Self {
        Self {
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            custom_body: None,
            request_glossary: false,
        }
    }

    /// System prompt for a batch whose protected lines are `lines`.
    pub fn system_prompt(&self, lines: &[String], glossary: &Glossary) -> String {
        let vars = [
            ("source_lang", self.source_lang.as_str()),
            ("target_lang", self.target_lang.as_str()),
            ("marker", GLOSSARY_MARKER),
        ];

        let mut parts = vec![render_template(PREFIX, &vars)];
        let body = self.custom_body.as_deref().unwrap_or(DEFAULT_BODY);
        parts.push(render_template(body, &vars));

        let glossary_block = glossary.build_prompt_context(lines);
        if !glossary_block.is_empty() {
            parts.push(glossary_block.trim_end().to_string());
        }

        parts.push(SUFFIX.to_string());
        if self.request_glossary {
            parts.push(render_template(GLOSSARY_REQUEST, &vars));
        }
        parts.join("\n\n")
    }

    pub fn user_content(&self, lines: &[String], context: &[String]) -> String {
        let mut object = serde_json::Map::new();
        for (i, line) in lines.iter().enumerate() {
            object.insert(i.to_string(), serde_json::Value::String(line.clone()));
        }
        let body = serde_json::to_string_pretty(&serde_json::Value::Object(object))
            .unwrap_or_else(|_| "{}".to_string());

        if context.is_empty() {
            body
        } else {
            format!("{}\n{}\n\n{}", CONTEXT_HEADER, context.join("\n"), body)
        }
    }

    pub fn build(&self, lines: &[String], context: &[String], glossary: &Glossary) -> Vec<Message> {
        vec![
            Message::system(self.system_prompt(lines, glossary)),
            Message::user(self.user_content(lines, context)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        assert_eq!(
            render_template("{{a}} to {{b}}", &[("a", "ja"), ("b", "zh")]),
            "ja to zh"
        );
    }

    #[test]
    fn test_build_messages() {
        let builder = PromptBuilder::new("Japanese", "Chinese");
        let glossary = Glossary::parse("アリス = 爱丽丝");
        let lines = vec!["アリスです。".to_string(), "はい".to_string()];
        let messages = builder.build(&lines, &["前の文。".to_string()], &glossary);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("Japanese"));
        assert!(messages[0].content.contains("爱丽丝"));
        assert!(!messages[0].content.contains(GLOSSARY_MARKER));

        let user = &messages[1].content;
        assert!(user.starts_with(CONTEXT_HEADER));
        let json_start = user.find('{').unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&user[json_start..]).unwrap();
        assert_eq!(parsed["0"], "アリスです。");
        assert_eq!(parsed["1"], "はい");
    }

    #[test]
    fn test_custom_body_and_glossary_request() {
        let mut builder = PromptBuilder::new("English", "Chinese");
        builder.custom_body = Some("Translate into {{target_lang}} casually.".to_string());
        builder.request_glossary = true;
        let prompt = builder.system_prompt(&["hi".to_string()], &Glossary::new());
        assert!(prompt.contains("Translate into Chinese casually."));
        assert!(prompt.contains(GLOSSARY_MARKER));
    }
}
