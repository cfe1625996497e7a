//! Restores punctuation variants the model drifted away from

use once_cell::sync::Lazy;
use regex::Regex;

/// Pairs of characters the model tends to swap for one another. Pairs are
/// disjoint so one rewrite can never feed another.
const EQUIVALENCE_CLASSES: &[[char; 2]] = &[
    ['　', ' '],
    ['：', ':'],
    ['・', '·'],
    ['？', '?'],
    ['！', '!'],
    ['—', '―'],
    ['－', '-'],
    ['〜', '～'],
    ['「', '“'],
    ['」', '”'],
    ['『', '‘'],
    ['』', '’'],
    ['《', '<'],
    ['》', '>'],
    ['（', '('],
    ['）', ')'],
];

static NUMBER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+|[\u{2460}-\u{2473}\u{3251}-\u{325F}\u{32B1}-\u{32BF}]").unwrap());

/// Full punctuation repair: equivalence classes, then circled numbers.
pub fn repair(src: &str, dst: &str) -> String {
    let mut result = dst.to_string();
    for &[a, b] in EQUIVALENCE_CLASSES {
        result = fix_pair(src, &result, a, b);
        result = fix_pair(src, &result, b, a);
    }
    restore_circled_numbers(src, &result)
}

/// Rewrites `wrong` into `right` in `dst` only when the source shows that a
/// one-to-one remapping is the sole consistent explanation.
fn fix_pair(src: &str, dst: &str, right: char, wrong: char) -> String {
    let src_right = count(src, right);
    let src_wrong = count(src, wrong);
    let dst_right = count(dst, right);
    let dst_wrong = count(dst, wrong);

    if src_right > 0
        && src_right != src_wrong
        && src_right > dst_right
        && src_right == dst_right + dst_wrong
    {
        dst.replace(wrong, &right.to_string())
    } else {
        dst.to_string()
    }
}

fn count(s: &str, c: char) -> usize {
    s.chars().filter(|&x| x == c).count()
}

/// Maps 1..=50 to its circled glyph.
pub fn circled_number(n: u32) -> Option<char> {
    match n {
        1..=20 => char::from_u32(0x2460 + n - 1),
        21..=35 => char::from_u32(0x3251 + n - 21),
        36..=50 => char::from_u32(0x32B1 + n - 36),
        _ => None,
    }
}

/// Puts circled glyphs back where the destination spelled them as digits.
/// Tokens are aligned by position; mismatched token counts leave `dst` alone.
pub fn restore_circled_numbers(src: &str, dst: &str) -> String {
    let src_tokens: Vec<&str> = NUMBER_TOKEN.find_iter(src).map(|m| m.as_str()).collect();
    if !src_tokens.iter().any(|t| !t.as_bytes()[0].is_ascii_digit()) {
        return dst.to_string();
    }

    let dst_tokens: Vec<regex::Match> = NUMBER_TOKEN.find_iter(dst).collect();
    if dst_tokens.len() != src_tokens.len() {
        return dst.to_string();
    }

    let mut result = String::with_capacity(dst.len());
    let mut last = 0;
    for (src_token, m) in src_tokens.iter().zip(dst_tokens.iter()) {
        result.push_str(&dst[last..m.start()]);
        let replacement = m
            .as_str()
            .parse::<u32>()
            .ok()
            .and_then(circled_number)
            .filter(|glyph| src_token.starts_with(*glyph));
        match replacement {
            Some(glyph) => result.push(glyph),
            None => result.push_str(m.as_str()),
        }
        last = m.end();
    }
    result.push_str(&dst[last..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restores_fullwidth_when_unambiguous() {
        let src = "「なに？」「本当？」";
        let dst = "「什么?」「真的?」";
        assert_eq!(repair(src, dst), "「什么？」「真的？」");
    }

    #[test]
    fn test_leaves_ambiguous_counts_alone() {
        // Source mixes both variants equally, nothing can be inferred.
        let src = "a? b？";
        let dst = "x? y?";
        assert_eq!(repair(src, dst), "x? y?");
    }

    #[test]
    fn test_no_change_when_dst_already_right() {
        let src = "Hello: world";
        let dst = "你好: 世界";
        assert_eq!(repair(src, dst), dst);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let cases = [
            ("「なに？」", "「什么?」"),
            ("①と②", "1和2"),
            ("時間：３時", "时间:3点"),
            ("A — B — C", "A - B ― C"),
        ];
        for (src, dst) in cases {
            let once = repair(src, dst);
            let twice = repair(src, &once);
            assert_eq!(once, twice, "not idempotent for {src:?}");
        }
    }

    #[test]
    fn test_equivalence_classes_are_disjoint() {
        let mut seen = std::collections::HashSet::new();
        for pair in EQUIVALENCE_CLASSES {
            for c in pair {
                assert!(seen.insert(*c), "{c:?} appears in two classes");
            }
        }
    }

    #[test]
    fn test_repair_is_idempotent_over_random_inputs() {
        let alphabet: Vec<char> = EQUIVALENCE_CLASSES
            .iter()
            .flatten()
            .copied()
            .chain(['a', '1', '①', '〜', '~'])
            .collect();

        // xorshift keeps the sequence reproducible without an rng crate
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move |bound: usize| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % bound as u64) as usize
        };

        for _ in 0..20_000 {
            let src_len = next(8);
            let src: String = (0..src_len).map(|_| alphabet[next(alphabet.len())]).collect();
            let dst_len = next(8);
            let dst: String = (0..dst_len).map(|_| alphabet[next(alphabet.len())]).collect();

            let once = repair(&src, &dst);
            let twice = repair(&src, &once);
            assert_eq!(once, twice, "not idempotent for src={src:?} dst={dst:?}");
        }
    }

    #[test]
    fn test_dash_variants_settle_in_one_pass() {
        let src = "－－\u{3000}a—";
        let dst = " —―—";
        let once = repair(src, dst);
        assert_eq!(repair(src, &once), once);
    }

    #[test]
    fn test_circled_numbers_restored_by_position() {
        assert_eq!(restore_circled_numbers("①を押して②へ", "按1然后到2"), "按①然后到②");
        assert_eq!(restore_circled_numbers("①と10", "1和10"), "①和10");
    }

    #[test]
    fn test_circled_number_table() {
        assert_eq!(circled_number(1), Some('①'));
        assert_eq!(circled_number(20), Some('⑳'));
        assert_eq!(circled_number(21), Some('㉑'));
        assert_eq!(circled_number(50), Some('㊿'));
        assert_eq!(circled_number(51), None);
    }
}
