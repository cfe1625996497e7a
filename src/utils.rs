//! Common utility functions

pub fn truncate_display(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}

pub fn is_code_like(s: &str) -> bool {
    let s = s.trim();
    s.starts_with("!!")
        || s.contains("%(")
        || (s.starts_with('[') && s.ends_with(']') && !s.contains(' '))
        || (s.starts_with('{') && s.ends_with('}') && !s.contains(' '))
        || s.chars().all(|c| c.is_ascii_punctuation() || c.is_whitespace())
}

pub fn is_hiragana(c: char) -> bool {
    ('\u{3040}'..='\u{309F}').contains(&c)
}

pub fn is_katakana(c: char) -> bool {
    ('\u{30A0}'..='\u{30FF}').contains(&c) || ('\u{31F0}'..='\u{31FF}').contains(&c)
}

pub fn is_hangeul(c: char) -> bool {
    ('\u{AC00}'..='\u{D7AF}').contains(&c)
        || ('\u{1100}'..='\u{11FF}').contains(&c)
        || ('\u{3130}'..='\u{318F}').contains(&c)
}

pub fn is_han(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c)
        || ('\u{3400}'..='\u{4DBF}').contains(&c)
        || ('\u{F900}'..='\u{FAFF}').contains(&c)
}

pub fn has_kana(s: &str) -> bool {
    s.chars().any(|c| is_hiragana(c) || is_katakana(c))
}

pub fn has_hangeul(s: &str) -> bool {
    s.chars().any(is_hangeul)
}

/// Normalized language codes understood by the filters and validator.
pub fn normalize_language(lang: &str) -> String {
    match lang.to_lowercase().as_str() {
        "japanese" | "ja" | "jp" | "ja-jp" => "ja".to_string(),
        "korean" | "ko" | "kr" | "ko-kr" => "ko".to_string(),
        "chinese" | "zh" | "zh-cn" | "zh_cn" | "chs" | "zh-hans" => "zh".to_string(),
        "zh-tw" | "zh_tw" | "cht" | "zh-hant" => "zh-tw".to_string(),
        "english" | "en" => "en".to_string(),
        "russian" | "ru" => "ru".to_string(),
        other => other.to_string(),
    }
}

/// Whether `text` contains at least one character of `lang`'s script.
pub fn contains_language(text: &str, lang: &str) -> bool {
    match normalize_language(lang).as_str() {
        "ja" => text.chars().any(|c| is_hiragana(c) || is_katakana(c) || is_han(c)),
        "ko" => has_hangeul(text),
        "zh" | "zh-tw" => text.chars().any(is_han),
        "ru" => text.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c)),
        _ => text.chars().any(char::is_alphabetic),
    }
}
