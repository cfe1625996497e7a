//! Classifies decoded responses as accepted or rejected

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::code_saver::CODE_PLACEHOLDER;
use super::filter;
use super::response::LineMap;
use crate::utils::{has_hangeul, has_kana, normalize_language};

/// Phrases models append when they invent a continuation.
const FAKE_CONTINUATION_MARKERS: &[&str] = &[
    "（未完待续）",
    "(未完待续)",
    "(To be continued)",
    "<|im_end|>",
    "<|endoftext|>",
];

const SIMILARITY_THRESHOLD: f64 = 0.80;
const DEGENERATION_REPEATS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Transport or provider failure
    Unknown,
    /// Empty or unusable response
    FailData,
    /// Line count or key set mismatch
    FailLine,
    /// Some lines look untranslated
    Similarity,
    /// Repetition loops in the output
    Degradation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Unknown => write!(f, "UNKNOWN"),
            FailureKind::FailData => write!(f, "FAIL_DATA"),
            FailureKind::FailLine => write!(f, "FAIL_LINE"),
            FailureKind::Similarity => write!(f, "SIMILARITY"),
            FailureKind::Degradation => write!(f, "DEGRADATION"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    pub failure: Option<FailureKind>,
    /// Per-line flags (`true` = rejected), present for line-level failures
    pub flags: Option<Vec<bool>>,
}

impl Verdict {
    pub fn accepted() -> Self {
        Self::default()
    }

    fn fail(kind: FailureKind) -> Self {
        Self {
            failure: Some(kind),
            flags: None,
        }
    }

    fn masked(kind: FailureKind, flags: Vec<bool>) -> Self {
        Self {
            failure: Some(kind),
            flags: Some(flags),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.failure.is_none()
    }
}

/// Facts about the batch being checked, beyond its text.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchInfo {
    /// `Some(retry_count)` when the batch holds exactly one unit
    pub singleton_retries: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ResultValidator {
    source_language: String,
    similarity_round_cutoff: usize,
    singleton_retry_threshold: u32,
}

impl ResultValidator {
    pub fn new(source_language: &str, token_limit: usize) -> Self {
        Self {
            source_language: normalize_language(source_language),
            similarity_round_cutoff: default_similarity_cutoff(token_limit),
            singleton_retry_threshold: 1,
        }
    }

    pub fn with_similarity_cutoff(mut self, cutoff: Option<usize>) -> Self {
        if let Some(c) = cutoff {
            self.similarity_round_cutoff = c;
        }
        self
    }

    pub fn with_singleton_retry_threshold(mut self, threshold: u32) -> Self {
        self.singleton_retry_threshold = threshold;
        self
    }

    pub fn similarity_round_cutoff(&self) -> usize {
        self.similarity_round_cutoff
    }

    pub fn singleton_retry_threshold(&self) -> u32 {
        self.singleton_retry_threshold
    }

    /// Whether a singleton batch with `retries` prior failures is waved through.
    pub fn overrides_singleton(&self, retries: u32) -> bool {
        retries >= self.singleton_retry_threshold
    }

    /// Checks `dst` against the dense source lines `src`.
    pub fn check(&self, src: &[String], dst: &LineMap, round: usize, batch: BatchInfo) -> Verdict {
        if !dst.is_empty() && dst.values().all(|v| v.trim().is_empty()) {
            return Verdict::fail(FailureKind::FailData);
        }

        if batch
            .singleton_retries
            .is_some_and(|r| self.overrides_singleton(r))
        {
            return Verdict::accepted();
        }

        if src.len() != dst.len() || !has_dense_keys(dst) {
            return Verdict::fail(FailureKind::FailLine);
        }

        let pairs: Vec<(&str, &str)> = (0..src.len())
            .map(|i| (src[i].as_str(), dst[&i.to_string()].as_str()))
            .collect();

        if round <= self.similarity_round_cutoff {
            let flags: Vec<bool> = pairs
                .iter()
                .map(|(s, d)| self.looks_untranslated(s, d))
                .collect();
            if flags.iter().any(|&f| f) {
                return Verdict::masked(FailureKind::Similarity, flags);
            }
        }

        let flags: Vec<bool> = pairs
            .iter()
            .map(|(s, d)| has_degenerate_run(d) && !has_degenerate_run(s))
            .collect();
        if flags.iter().any(|&f| f) {
            return Verdict::masked(FailureKind::Degradation, flags);
        }

        Verdict::accepted()
    }

    fn looks_untranslated(&self, src: &str, dst: &str) -> bool {
        if src.contains(CODE_PLACEHOLDER) {
            return false;
        }
        if filter::is_rule_exempt(src) || !filter::has_source_language(src, &self.source_language) {
            return false;
        }
        if FAKE_CONTINUATION_MARKERS.iter().any(|m| dst.contains(m)) {
            return true;
        }

        let src_t = src.trim();
        let dst_t = dst.trim();
        let similar = src_t.contains(dst_t)
            || dst_t.contains(src_t)
            || jaccard(src_t, dst_t) > SIMILARITY_THRESHOLD;
        if !similar {
            return false;
        }

        match self.source_language.as_str() {
            "ja" => has_kana(dst),
            "ko" => has_hangeul(dst),
            _ => true,
        }
    }
}

/// `ceil(log2(token_limit))`: the last round in which whole-batch
/// similarity rejection still applies.
pub fn default_similarity_cutoff(token_limit: usize) -> usize {
    let limit = token_limit.max(1);
    (usize::BITS - (limit - 1).leading_zeros()) as usize
}

fn has_dense_keys(dst: &LineMap) -> bool {
    (0..dst.len()).all(|i| dst.contains_key(&i.to_string()))
}

/// Character-set Jaccard similarity, ignoring whitespace.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let sa: HashSet<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let sb: HashSet<char> = b.chars().filter(|c| !c.is_whitespace()).collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 1.0;
    }
    sa.intersection(&sb).count() as f64 / union as f64
}

/// Whether `text` repeats one 1-2 char unit at least 16 times in a row.
pub fn has_degenerate_run(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    for width in 1..=2 {
        if chars.len() < width * DEGENERATION_REPEATS {
            continue;
        }
        let mut run = 1;
        let mut i = width;
        while i + width <= chars.len() {
            if chars[i..i + width] == chars[i - width..i] {
                run += 1;
                if run >= DEGENERATION_REPEATS {
                    return true;
                }
                i += width;
            } else {
                run = 1;
                i += 1;
            }
        }
    }
    false
}
