//! Translation units and run metadata

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SourceFormat {
    #[default]
    Text,
    Subtitle,
    Spreadsheet,
    Ebook,
    /// Ren'Py style visual novel scripts (`{tag}`, `[var]`)
    RenPy,
    /// Bracket/brace control code engines (`\C[1]`, `\N[2]`, `\{`)
    ScriptEngine,
    KeyValueJson,
    MessageJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UnitStatus {
    #[default]
    Untranslated,
    /// Sent out in the current round; reset to `Untranslated` when the
    /// task does not accept it.
    Translating,
    Translated,
    Excluded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TranslationUnit {
    pub source: String,
    pub target: String,
    pub auxiliary_source: String,
    pub auxiliary_target: String,
    pub tag: String,
    pub sequence_index: usize,
    pub source_format: SourceFormat,
    pub file_path: String,
    pub status: UnitStatus,
    pub retry_count: u32,
}

impl TranslationUnit {
    pub fn new(file_path: &str, sequence_index: usize, source: &str) -> Self {
        Self {
            source: source.to_string(),
            file_path: file_path.to_string(),
            sequence_index,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.source_format = format;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == UnitStatus::Untranslated
    }

    /// Marks the unit as excluded. Excluded units write back their source.
    pub fn exclude(&mut self) {
        self.status = UnitStatus::Excluded;
        if self.target.is_empty() {
            self.target = self.source.clone();
        }
    }

    /// Text used when writing the unit back to its file.
    pub fn output_text(&self) -> &str {
        if self.target.is_empty() {
            &self.source
        } else {
            &self.target
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProjectStatus {
    #[default]
    Untranslated,
    Translating,
    Translated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProjectExtras {
    /// Unix timestamp (seconds) of the first start of this run
    pub start_time: i64,
    pub total_lines: usize,
    pub completed_lines: usize,
    pub tokens_used: u64,
    pub completion_tokens: u64,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProject {
    pub id: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub extras: ProjectExtras,
}

impl RunProject {
    pub fn new() -> Self {
        let now = chrono::Local::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8]),
            status: ProjectStatus::Untranslated,
            extras: ProjectExtras {
                start_time: now.timestamp(),
                ..Default::default()
            },
        }
    }

    /// Credits newly translated lines, never exceeding the total.
    pub fn credit_lines(&mut self, lines: usize) {
        self.extras.completed_lines =
            (self.extras.completed_lines + lines).min(self.extras.total_lines);
    }
}

impl Default for RunProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a run mutates: project metadata plus the ordered unit list.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub project: RunProject,
    pub units: Vec<TranslationUnit>,
}

impl Session {
    pub fn new(units: Vec<TranslationUnit>) -> Self {
        let mut project = RunProject::new();
        project.extras.total_lines = units.len();
        Self { project, units }
    }

    /// Units still waiting for a translation, in flight or not.
    pub fn pending_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| matches!(u.status, UnitStatus::Untranslated | UnitStatus::Translating))
            .count()
    }

    /// Recomputes line counters from unit statuses.
    pub fn recount(&mut self) {
        self.project.extras.total_lines = self
            .units
            .iter()
            .filter(|u| u.status != UnitStatus::Excluded)
            .count();
        self.project.extras.completed_lines = self
            .units
            .iter()
            .filter(|u| u.status == UnitStatus::Translated)
            .count();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclude_keeps_source_as_target() {
        let mut unit = TranslationUnit::new("a.txt", 0, "12345");
        unit.exclude();
        assert_eq!(unit.status, UnitStatus::Excluded);
        assert_eq!(unit.output_text(), "12345");
    }

    #[test]
    fn test_credit_lines_is_capped() {
        let mut project = RunProject::new();
        project.extras.total_lines = 3;
        project.credit_lines(2);
        project.credit_lines(5);
        assert_eq!(project.extras.completed_lines, 3);
    }

    #[test]
    fn test_unit_json_uses_defaults_for_missing_fields() {
        let unit: TranslationUnit =
            serde_json::from_str(r#"{"source":"hi","file_path":"a.txt"}"#).unwrap();
        assert_eq!(unit.status, UnitStatus::Untranslated);
        assert_eq!(unit.retry_count, 0);
    }

    #[test]
    fn test_project_id_has_timestamp_and_suffix() {
        let project = RunProject::new();
        let parts: Vec<&str> = project.id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_pending_count_includes_in_flight_units() {
        let mut session = Session::new(vec![
            TranslationUnit::new("a.txt", 0, "one"),
            TranslationUnit::new("a.txt", 1, "two"),
            TranslationUnit::new("a.txt", 2, "three"),
        ]);
        session.units[0].status = UnitStatus::Translating;
        session.units[1].status = UnitStatus::Translated;
        assert_eq!(session.pending_count(), 2);
        assert!(!session.units[0].is_pending());
    }
}
