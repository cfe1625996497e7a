//! File adapters: reading units out of source files and writing them back

pub mod renpy;
pub mod text;

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::translate::unit::TranslationUnit;

pub trait FileAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn handles(&self, rel_path: &str) -> bool;

    /// Reads the units of `root/rel_path`; `file_path` is set to `rel_path`.
    fn read_units(&self, root: &Path, rel_path: &str) -> Result<Vec<TranslationUnit>>;

    /// Writes `input_root/rel_path` to `output_root/rel_path` with the
    /// units' output text substituted.
    fn write_units(
        &self,
        input_root: &Path,
        output_root: &Path,
        rel_path: &str,
        units: &[TranslationUnit],
    ) -> Result<()>;
}

pub fn adapters() -> Vec<Box<dyn FileAdapter>> {
    vec![Box::new(text::TextAdapter), Box::new(renpy::RenpyAdapter::new())]
}

pub fn adapter_for<'a>(
    adapters: &'a [Box<dyn FileAdapter>],
    rel_path: &str,
) -> Option<&'a dyn FileAdapter> {
    adapters
        .iter()
        .find(|a| a.handles(rel_path))
        .map(|a| a.as_ref())
}

/// Splits `input` into a root directory and the supported files under it,
/// as `/`-separated relative paths in sorted order.
pub fn collect_files(input: &Path, adapters: &[Box<dyn FileAdapter>]) -> Result<(PathBuf, Vec<String>)> {
    if input.is_file() {
        let root = input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = input
            .file_name()
            .and_then(|n| n.to_str())
            .context("Input file name is not valid UTF-8")?
            .to_string();
        let files = if adapter_for(adapters, &name).is_some() {
            vec![name]
        } else {
            Vec::new()
        };
        return Ok((root, files));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(input) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if adapter_for(adapters, &rel).is_some() {
            files.push(rel);
        }
    }
    files.sort();
    Ok((input.to_path_buf(), files))
}

pub fn read_all(
    root: &Path,
    files: &[String],
    adapters: &[Box<dyn FileAdapter>],
) -> Result<Vec<TranslationUnit>> {
    let mut units = Vec::new();
    for rel in files {
        if let Some(adapter) = adapter_for(adapters, rel) {
            let read = adapter
                .read_units(root, rel)
                .with_context(|| format!("Failed to read {}", rel))?;
            tracing::debug!(file = %rel, adapter = adapter.name(), units = read.len(), "file read");
            units.extend(read);
        }
    }
    Ok(units)
}

/// Writes every file that has units; returns the number of files written.
pub fn write_all(
    input_root: &Path,
    output_root: &Path,
    units: &[TranslationUnit],
    adapters: &[Box<dyn FileAdapter>],
) -> Result<usize> {
    let mut by_file: BTreeMap<&str, Vec<TranslationUnit>> = BTreeMap::new();
    for unit in units {
        by_file
            .entry(unit.file_path.as_str())
            .or_default()
            .push(unit.clone());
    }

    let mut written = 0;
    for (rel, file_units) in by_file {
        let Some(adapter) = adapter_for(adapters, rel) else {
            tracing::warn!(file = %rel, "no adapter for cached file, skipped");
            continue;
        };
        adapter
            .write_units(input_root, output_root, rel, &file_units)
            .with_context(|| format!("Failed to write {}", rel))?;
        written += 1;
    }
    Ok(written)
}

pub(crate) fn output_path(output_root: &Path, rel_path: &str) -> Result<PathBuf> {
    let path = output_root.join(rel_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    Ok(path)
}

pub(crate) fn has_extension(rel_path: &str, ext: &str) -> bool {
    Path::new(rel_path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
