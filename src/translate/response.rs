//! Decodes model output into index-keyed line maps

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Decoded `{key: text}` pairs.
pub type LineMap = BTreeMap<String, String>;

/// Marks the start of the glossary suggestion block in a response.
pub const GLOSSARY_MARKER: &str = "<glossary>";

/// A quoted numeric key opening the object, following a comma or starting
/// a line. Digits and colons inside values never match.
static INDEX_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[{,\n])\s*["'“”‘’](\d+)["'“”‘’]\s*[:：]\s*"#).unwrap()
});

static NAME_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“‘]([^"“”‘’\n]+?)["”’]\s*[:：]\s*"#).unwrap());

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedResponse {
    pub lines: LineMap,
    pub glossary: Vec<GlossaryCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryCandidate {
    pub src: String,
    pub dst: String,
    pub info: String,
}

/// Decodes a full response. When `with_glossary` is set, text after
/// [`GLOSSARY_MARKER`] is decoded separately as glossary candidates.
pub fn decode(text: &str, with_glossary: bool) -> DecodedResponse {
    let (lines_part, glossary_part) = match text.find(GLOSSARY_MARKER) {
        Some(pos) if with_glossary => (&text[..pos], Some(&text[pos + GLOSSARY_MARKER.len()..])),
        Some(pos) => (&text[..pos], None),
        None => (text, None),
    };

    DecodedResponse {
        lines: decode_lines(lines_part),
        glossary: glossary_part.map(decode_glossary).unwrap_or_default(),
    }
}

/// Strict JSON first, then permissive key/value extraction.
pub fn decode_lines(text: &str) -> LineMap {
    if let Some(map) = decode_strict(text) {
        return map;
    }
    decode_permissive(text, &INDEX_KEY)
}

fn decode_glossary(text: &str) -> Vec<GlossaryCandidate> {
    let map = decode_strict(text).unwrap_or_else(|| decode_permissive(text, &NAME_KEY));
    map.into_iter()
        .filter_map(|(src, value)| {
            let mut parts = value.splitn(2, '|');
            let dst = parts.next().unwrap_or_default().trim().to_string();
            let info = parts.next().unwrap_or_default().trim().to_string();
            let src = src.trim().to_string();
            (!src.is_empty() && !dst.is_empty()).then_some(GlossaryCandidate { src, dst, info })
        })
        .collect()
}

/// Parses the outermost `{...}` object of `text` as JSON.
pub fn decode_strict(text: &str) -> Option<LineMap> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let object = value.as_object()?;

    let map = object
        .iter()
        .map(|(k, v)| (k.clone(), value_to_text(v)))
        .collect();
    Some(map)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(obj) => {
            // {"dst": "...", "info": "..."} glossary shape
            let dst = obj.get("dst").map(value_to_text).unwrap_or_default();
            let info = obj.get("info").map(value_to_text).unwrap_or_default();
            if info.is_empty() {
                dst
            } else {
                format!("{}|{}", dst, info)
            }
        }
        other => other.to_string(),
    }
}

/// Splits `text` at every key match; each value runs to the next key.
/// Tolerates mixed quote styles, trailing commas and unescaped quotes.
pub fn decode_permissive(text: &str, key: &Regex) -> LineMap {
    let keys: Vec<(String, usize, usize)> = key
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((caps[1].to_string(), whole.start(), whole.end()))
        })
        .collect();

    let mut map = LineMap::new();
    for (i, (name, _, value_start)) in keys.iter().enumerate() {
        let value_end = keys.get(i + 1).map(|k| k.1).unwrap_or(text.len());
        let raw = &text[*value_start..value_end];
        map.insert(name.clone(), clean_value(raw));
    }
    map
}

fn clean_value(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_end_matches('}')
        .trim_end()
        .trim_end_matches(',')
        .trim_end();
    let unquoted = strip_quotes(trimmed);
    unescape(unquoted)
}

fn strip_quotes(s: &str) -> &str {
    const QUOTES: &[char] = &['"', '\'', '“', '”', '‘', '’'];
    let s = s.strip_prefix(QUOTES).unwrap_or(s);
    let s = if s.ends_with("\\\"") {
        s
    } else {
        s.strip_suffix(QUOTES).unwrap_or(s)
    };
    s
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
