//! Groups pending units into token-bounded chunks

use std::collections::HashMap;

use parking_lot::Mutex;
use tiktoken_rs::CoreBPE;

use super::unit::TranslationUnit;

/// Maximum number of units carried over as preceding context.
pub const CONTEXT_SIZE: usize = 3;

/// Characters that end a sentence for context selection.
const SENTENCE_END: &[char] = &[
    '.', '。', '?', '？', '!', '！', '…', '\'', '"', '’', '”', '」', '』',
];

enum Backend {
    Bpe(Box<CoreBPE>),
    /// Roughly one token per CJK char, one per four other chars.
    Heuristic,
}

/// Memoizing token counter, keyed by source text.
pub struct TokenEstimator {
    backend: Backend,
    memo: Mutex<HashMap<String, usize>>,
}

impl TokenEstimator {
    /// Uses the o200k subword encoding, falling back to the heuristic.
    pub fn new() -> Self {
        let backend = match tiktoken_rs::o200k_base() {
            Ok(bpe) => Backend::Bpe(Box::new(bpe)),
            Err(e) => {
                tracing::warn!("Tokenizer unavailable, using heuristic estimate: {}", e);
                Backend::Heuristic
            }
        };
        Self {
            backend,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn heuristic() -> Self {
        Self {
            backend: Backend::Heuristic,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn estimate(&self, text: &str) -> usize {
        if let Some(n) = self.memo.lock().get(text) {
            return *n;
        }
        let n = match &self.backend {
            Backend::Bpe(bpe) => bpe.encode_ordinary(text).len(),
            Backend::Heuristic => heuristic_count(text),
        };
        self.memo.lock().insert(text.to_string(), n);
        n
    }

    pub fn memo_len(&self) -> usize {
        self.memo.lock().len()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn heuristic_count(text: &str) -> usize {
    let mut wide: usize = 0;
    let mut narrow: usize = 0;
    for c in text.chars() {
        if c.len_utf8() >= 3 {
            wide += 1;
        } else {
            narrow += 1;
        }
    }
    wide + narrow.div_ceil(4)
}

/// A batch of units (indices into the session unit list) from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub file_path: String,
    pub members: Vec<usize>,
    pub context: Vec<usize>,
    pub token_cost: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Row cap for a chunk under `token_limit`.
pub fn row_limit(token_limit: usize) -> usize {
    (token_limit / 16).max(8)
}

/// Effective token limit for `round`; halves after every round, minimum 1.
pub fn round_token_limit(base: usize, round: usize) -> usize {
    let shift = round.min(usize::BITS as usize - 1);
    (base >> shift).max(1)
}

pub struct ChunkPlanner {
    estimator: TokenEstimator,
}

impl ChunkPlanner {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self { estimator }
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Plans chunks over the pending units of `units`, in stored order.
    pub fn plan(&self, units: &[TranslationUnit], token_limit: usize) -> Vec<Chunk> {
        let max_rows = row_limit(token_limit);
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut current_cost = 0;
        let mut current_file: Option<&str> = None;

        for (idx, unit) in units.iter().enumerate() {
            if !unit.is_pending() {
                continue;
            }
            let cost = self.estimator.estimate(&unit.source);
            let file_changed = current_file.is_some_and(|f| f != unit.file_path);

            if !current.is_empty()
                && (file_changed || current_cost + cost > token_limit || current.len() >= max_rows)
            {
                self.close(units, &mut chunks, std::mem::take(&mut current), current_cost);
                current_cost = 0;
            }

            current.push(idx);
            current_cost += cost;
            current_file = Some(&unit.file_path);
        }

        if !current.is_empty() {
            self.close(units, &mut chunks, current, current_cost);
        }

        chunks
    }

    fn close(
        &self,
        units: &[TranslationUnit],
        chunks: &mut Vec<Chunk>,
        members: Vec<usize>,
        token_cost: usize,
    ) {
        let file_path = units[members[0]].file_path.clone();
        let context = match chunks.last() {
            Some(prev) if prev.file_path == file_path => preceding_context(units, &prev.members),
            _ => Vec::new(),
        };
        chunks.push(Chunk {
            file_path,
            members,
            context,
            token_cost,
        });
    }
}

/// Picks up to [`CONTEXT_SIZE`] sentence-final units from `previous`,
/// scanning backwards by sequence index, returned in forward order.
pub fn preceding_context(units: &[TranslationUnit], previous: &[usize]) -> Vec<usize> {
    let mut ordered: Vec<usize> = previous.to_vec();
    ordered.sort_by_key(|&i| std::cmp::Reverse(units[i].sequence_index));

    let mut picked: Vec<usize> = ordered
        .into_iter()
        .filter(|&i| ends_sentence(&units[i].source))
        .take(CONTEXT_SIZE)
        .collect();
    picked.reverse();
    picked
}

pub fn ends_sentence(text: &str) -> bool {
    text.trim()
        .chars()
        .last()
        .is_some_and(|c| SENTENCE_END.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::unit::UnitStatus;

    fn units(file: &str, texts: &[&str]) -> Vec<TranslationUnit> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| TranslationUnit::new(file, i, t))
            .collect()
    }

    fn planner() -> ChunkPlanner {
        ChunkPlanner::new(TokenEstimator::heuristic())
    }

    #[test]
    fn test_chunks_respect_token_limit() {
        let list = units("a.txt", &["aaaaaaaa"; 10]);
        let chunks = planner().plan(&list, 5);
        assert_eq!(chunks.len(), 5);
        for chunk in &chunks {
            assert!(chunk.token_cost <= 5);
        }
    }

    #[test]
    fn test_oversized_first_unit_is_admitted() {
        let long = "x".repeat(400);
        let list = units("a.txt", &[long.as_str(), "short"]);
        let chunks = planner().plan(&list, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].members, vec![0]);
        assert!(chunks[0].token_cost > 10);
    }

    #[test]
    fn test_chunks_never_span_files() {
        let mut list = units("a.txt", &["one.", "two."]);
        list.extend(units("b.txt", &["three.", "four."]));
        let chunks = planner().plan(&list, 1000);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.members.iter().all(|&i| list[i].file_path == chunk.file_path));
        }
        assert!(chunks[1].context.is_empty());
    }

    #[test]
    fn test_row_cap() {
        let list = units("a.txt", &["a"; 20]);
        let chunks = planner().plan(&list, 64);
        assert_eq!(row_limit(64), 8);
        assert_eq!(chunks[0].len(), 8);
    }

    #[test]
    fn test_only_pending_units_are_planned() {
        let mut list = units("a.txt", &["a", "b", "c"]);
        list[1].status = UnitStatus::Translated;
        list[2].status = UnitStatus::Excluded;
        let chunks = planner().plan(&list, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].members, vec![0]);
    }

    #[test]
    fn test_preceding_context_prefers_sentence_ends() {
        let list = units(
            "a.txt",
            &["One.", "two", "Three!", "Four?", "「Five」", "six", "next"],
        );
        let chunks = planner().plan(&list, 6);
        let second = chunks
            .iter()
            .find(|c| c.members.contains(&6))
            .unwrap();
        assert!(second.context.len() <= CONTEXT_SIZE);
        for &i in &second.context {
            assert!(ends_sentence(&list[i].source));
        }
        let mut sorted = second.context.clone();
        sorted.sort();
        assert_eq!(sorted, second.context);
    }

    #[test]
    fn test_preceding_context_takes_last_three() {
        let list = units("a.txt", &["A.", "B.", "C.", "D.", "E"]);
        let ctx = preceding_context(&list, &[0, 1, 2, 3, 4]);
        assert_eq!(ctx, vec![1, 2, 3]);
    }

    #[test]
    fn test_round_token_limit_halves() {
        assert_eq!(round_token_limit(384, 0), 384);
        assert_eq!(round_token_limit(384, 1), 192);
        assert_eq!(round_token_limit(384, 2), 96);
        assert_eq!(round_token_limit(384, 40), 1);
    }

    #[test]
    fn test_estimates_are_memoized() {
        let estimator = TokenEstimator::heuristic();
        assert_eq!(estimator.estimate("こんにちは"), 5);
        assert_eq!(estimator.estimate("こんにちは"), 5);
        assert_eq!(estimator.estimate("abcdefgh"), 2);
        assert_eq!(estimator.memo_len(), 2);
    }

    #[test]
    fn test_heuristic_counts_wide_and_narrow_chars() {
        assert_eq!(heuristic_count(""), 0);
        assert_eq!(heuristic_count("ab漢字cd"), 3);
        assert_eq!(heuristic_count("abcde"), 2);
    }
}
