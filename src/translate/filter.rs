//! Pre-filters that exclude units not worth sending to the model

use once_cell::sync::Lazy;
use regex::Regex;

use super::unit::{TranslationUnit, UnitStatus};
use crate::utils::{contains_language, is_code_like};

static URL_OR_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://\S+|[A-Za-z]:[\\/]\S*|(?:[\w.-]+/)+[\w.-]+\.\w{1,5}|[\w.-]+\.(?:png|jpg|jpeg|ogg|mp3|wav|webm|ttf|otf|json|rpy))$")
        .unwrap()
});

/// Blank, numeric, punctuation-only, path-like or code-like text.
pub fn is_rule_exempt(text: &str) -> bool {
    let t = text.trim();
    t.is_empty()
        || t.chars()
            .all(|c| c.is_numeric() || c.is_whitespace() || is_punctuation(c))
        || URL_OR_PATH.is_match(t)
        || is_code_like(t)
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(c, '\u{2000}'..='\u{206F}' | '\u{3000}'..='\u{303F}' | '\u{FF00}'..='\u{FF0F}'
            | '\u{FF1A}'..='\u{FF20}' | '\u{FF3B}'..='\u{FF40}' | '\u{FF5B}'..='\u{FF65}'
            | '・' | '♪' | '☆' | '★' | '♥')
}

/// Whether `text` has any character of the source language's script.
pub fn has_source_language(text: &str, source_language: &str) -> bool {
    contains_language(text, source_language)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub by_rule: usize,
    pub by_language: usize,
}

/// Marks clearly irrelevant pending units as excluded.
pub fn apply_prefilters(units: &mut [TranslationUnit], source_language: &str) -> FilterStats {
    let mut stats = FilterStats::default();
    for unit in units.iter_mut().filter(|u| u.status == UnitStatus::Untranslated) {
        if is_rule_exempt(&unit.source) {
            unit.exclude();
            stats.by_rule += 1;
        } else if !has_source_language(&unit.source, source_language) {
            unit.exclude();
            stats.by_language += 1;
        }
    }
    stats
}
