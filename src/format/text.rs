//! Plain text: one unit per non-empty line

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::{FileAdapter, has_extension, output_path};
use crate::translate::unit::{SourceFormat, TranslationUnit};

pub struct TextAdapter;

impl FileAdapter for TextAdapter {
    fn name(&self) -> &str {
        "text"
    }

    fn handles(&self, rel_path: &str) -> bool {
        has_extension(rel_path, "txt")
    }

    fn read_units(&self, root: &Path, rel_path: &str) -> Result<Vec<TranslationUnit>> {
        let content = fs::read_to_string(root.join(rel_path)).context("Failed to read text file")?;
        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                TranslationUnit::new(rel_path, i, line).with_format(SourceFormat::Text)
            })
            .collect())
    }

    fn write_units(
        &self,
        input_root: &Path,
        output_root: &Path,
        rel_path: &str,
        units: &[TranslationUnit],
    ) -> Result<()> {
        let content =
            fs::read_to_string(input_root.join(rel_path)).context("Failed to read text file")?;
        let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();

        for unit in units {
            if let Some(line) = lines.get_mut(unit.sequence_index) {
                *line = unit.output_text().to_string();
            }
        }

        let mut out = lines.join("\n");
        if content.ends_with('\n') {
            out.push('\n');
        }
        fs::write(output_path(output_root, rel_path)?, out).context("Failed to write text file")
    }
}
