//! Glossary support for consistent term translation

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::response::GlossaryCandidate;

/// Tags in a candidate's info that mark it as a character name or role.
const NAME_TAGS: &[&str] = &[
    "male", "female", "name", "character", "男", "女", "名", "人物", "角色",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryEntry {
    pub src: String,
    pub dst: String,
    pub info: String,
}

#[derive(Debug, Clone, Default)]
pub struct Glossary {
    entries: Vec<GlossaryEntry>,
}

impl Glossary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).context("Failed to read glossary file")?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut glossary = Self::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }
            if let Some(entry) = Self::parse_line(line) {
                glossary.add(entry);
            } else {
                tracing::warn!("Invalid glossary entry at line {}: {}", line_num + 1, line);
            }
        }
        glossary
    }

    fn parse_line(line: &str) -> Option<GlossaryEntry> {
        // Supports: "source = target | info" and "source\ttarget\tinfo"
        for sep in ['=', '\t'] {
            let parts: Vec<&str> = line.splitn(2, sep).collect();
            if parts.len() == 2 {
                let src = parts[0].trim();
                let mut rest = parts[1].splitn(2, ['|', '\t']);
                let dst = rest.next().unwrap_or_default().trim();
                let info = rest.next().unwrap_or_default().trim();
                if !src.is_empty() && !dst.is_empty() {
                    return Some(GlossaryEntry {
                        src: src.to_string(),
                        dst: dst.to_string(),
                        info: info.to_string(),
                    });
                }
            }
        }
        None
    }

    pub fn add(&mut self, entry: GlossaryEntry) {
        match self.entries.iter_mut().find(|e| e.src == entry.src) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }

    /// Entries whose source term occurs in any of `texts`.
    pub fn matching<'a>(&'a self, texts: &[String]) -> Vec<&'a GlossaryEntry> {
        self.entries
            .iter()
            .filter(|e| texts.iter().any(|t| t.contains(&e.src)))
            .collect()
    }

    pub fn build_prompt_context(&self, texts: &[String]) -> String {
        let matched = self.matching(texts);
        if matched.is_empty() {
            return String::new();
        }
        let mut context = String::from("Use the following translations for specific terms:\n");
        for entry in matched {
            if entry.info.is_empty() {
                context.push_str(&format!("- \"{}\" → \"{}\"\n", entry.src, entry.dst));
            } else {
                context.push_str(&format!(
                    "- \"{}\" → \"{}\" ({})\n",
                    entry.src, entry.dst, entry.info
                ));
            }
        }
        context
    }

    /// Merges model-suggested names. Candidates need a name/role tag and
    /// must not overlap an existing source term by containment.
    pub fn merge_candidates(&mut self, candidates: &[GlossaryCandidate]) -> usize {
        let mut added = 0;
        for candidate in candidates {
            let info = candidate.info.to_lowercase();
            if !NAME_TAGS.iter().any(|tag| info.contains(tag)) {
                continue;
            }
            if candidate.src == candidate.dst {
                continue;
            }
            let overlaps = self
                .entries
                .iter()
                .any(|e| e.src.contains(&candidate.src) || candidate.src.contains(&e.src));
            if overlaps {
                continue;
            }
            self.entries.push(GlossaryEntry {
                src: candidate.src.clone(),
                dst: candidate.dst.clone(),
                info: candidate.info.clone(),
            });
            added += 1;
        }
        added
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            if entry.info.is_empty() {
                out.push_str(&format!("{} = {}\n", entry.src, entry.dst));
            } else {
                out.push_str(&format!("{} = {} | {}\n", entry.src, entry.dst, entry.info));
            }
        }
        out
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_text()).context("Failed to write glossary file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(src: &str, dst: &str, info: &str) -> GlossaryCandidate {
        GlossaryCandidate {
            src: src.to_string(),
            dst: dst.to_string(),
            info: info.to_string(),
        }
    }

    #[test]
    fn test_parse_formats() {
        let glossary =
            Glossary::parse("# names\nSylvie = 西尔维\nProfessor Eileen=艾琳教授 | female\nLucy\t露西");
        assert_eq!(glossary.len(), 3);
        assert_eq!(glossary.entries()[0].dst, "西尔维");
        assert_eq!(glossary.entries()[1].info, "female");
        assert_eq!(glossary.entries()[2].src, "Lucy");
    }

    #[test]
    fn test_prompt_context_only_matching_terms() {
        let glossary = Glossary::parse("Sylvie = 西尔维\nEileen = 艾琳");
        let ctx = glossary.build_prompt_context(&["Hello, Sylvie!".to_string()]);
        assert!(ctx.contains("西尔维"));
        assert!(!ctx.contains("艾琳"));
        assert!(glossary.build_prompt_context(&["nobody".to_string()]).is_empty());
    }

    #[test]
    fn test_merge_candidates_dedupes_by_containment() {
        let mut glossary = Glossary::parse("Eileen = 艾琳");
        let added = glossary.merge_candidates(&[
            candidate("Professor Eileen", "艾琳教授", "female name"),
            candidate("Tom", "汤姆", "male name"),
            candidate("sword", "剑", "item"),
            candidate("Tom", "汤米", "male name"),
        ]);
        assert_eq!(added, 1);
        assert_eq!(glossary.len(), 2);
        assert_eq!(glossary.entries()[1].dst, "汤姆");
    }

    #[test]
    fn test_text_roundtrip_keeps_info() {
        let mut glossary = Glossary::new();
        glossary.add(GlossaryEntry {
            src: "Tom".into(),
            dst: "汤姆".into(),
            info: "male name".into(),
        });
        let reparsed = Glossary::parse(&glossary.to_text());
        assert_eq!(reparsed.entries(), glossary.entries());
    }
}
