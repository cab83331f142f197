//! Decision audit log
//!
//! One [`DecisionRecord`] per course decision, appended as NDJSON. Sinks never
//! fail the caller: a write error is logged and dropped.

use crate::arbiter::ParseSource;
use chrono::{DateTime, Utc};
use coursegraph_dsl::{CourseCode, PrereqExpression};
use coursegraph_storage::SkippedRow;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Characters of raw prose kept on a record.
pub const RAW_EXCERPT_CHARS: usize = 500;
/// Characters of an error message kept on a record.
pub const ERROR_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    NoPrereqText,
    EmptyGroups,
    MismatchLowConf,
    Updated,
    WouldUpdate,
    SkippedLocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub course_id: CourseCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dept: Option<String>,
    pub issue: IssueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub raw: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_groups: Option<PrereqExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_groups: Option<PrereqExpression>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_rows: Vec<SkippedRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ParseSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DecisionRecord {
    pub fn new(course_id: CourseCode, issue: IssueKind, raw: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            course_id,
            dept: None,
            issue,
            confidence: None,
            raw: excerpt(raw, RAW_EXCERPT_CHARS),
            constraints: Vec::new(),
            current_groups: None,
            new_groups: None,
            skipped_rows: Vec::new(),
            source: None,
            error: None,
        }
    }

    pub fn with_dept(mut self, dept: Option<&str>) -> Self {
        self.dept = dept.map(str::to_string);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_constraints(mut self, constraints: &[String]) -> Self {
        self.constraints = constraints.to_vec();
        self
    }

    pub fn with_groups(mut self, current: PrereqExpression, new: PrereqExpression) -> Self {
        self.current_groups = Some(current);
        self.new_groups = Some(new);
        self
    }

    pub fn with_source(mut self, source: ParseSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_skipped_rows(mut self, rows: Vec<SkippedRow>) -> Self {
        self.skipped_rows = rows;
        self
    }

    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(excerpt(&error.to_string(), ERROR_EXCERPT_CHARS));
        self
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ============================================================================
// Sinks
// ============================================================================

pub trait DecisionSink: Send + Sync {
    fn record(&self, record: &DecisionRecord);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DecisionSink for NullSink {
    fn record(&self, _record: &DecisionRecord) {}
}

/// Keeps records in memory, for tests and summaries.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<DecisionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().clone()
    }

    pub fn issues(&self) -> Vec<(CourseCode, IssueKind)> {
        self.records
            .lock()
            .iter()
            .map(|r| (r.course_id.clone(), r.issue))
            .collect()
    }
}

impl DecisionSink for MemorySink {
    fn record(&self, record: &DecisionRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Appends one JSON object per line.
pub struct NdjsonSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl NdjsonSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, record: &DecisionRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()
    }
}

impl DecisionSink for NdjsonSink {
    fn record(&self, record: &DecisionRecord) {
        if let Err(err) = self.write(record) {
            tracing::warn!(
                path = %self.path.display(),
                course = %record.course_id,
                error = %err,
                "failed to append decision record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegraph_dsl::{canonicalize, parse_heuristic};

    fn code(s: &str) -> CourseCode {
        canonicalize(s).unwrap()
    }

    #[test]
    fn issue_kinds_serialize_snake_case() {
        let json = serde_json::to_value(IssueKind::MismatchLowConf).unwrap();
        assert_eq!(json, "mismatch_low_conf");
        let json = serde_json::to_value(IssueKind::NoPrereqText).unwrap();
        assert_eq!(json, "no_prereq_text");
    }

    #[test]
    fn excerpts_are_bounded() {
        let raw = "x".repeat(800);
        let record = DecisionRecord::new(code("CS240"), IssueKind::Updated, &raw)
            .with_error("e".repeat(300));
        assert_eq!(record.raw.len(), RAW_EXCERPT_CHARS);
        assert_eq!(record.error.as_deref().map(str::len), Some(ERROR_EXCERPT_CHARS));
    }

    #[test]
    fn ndjson_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("decisions.ndjson");
        let sink = NdjsonSink::open(&path).unwrap();

        let groups = parse_heuristic("CS 136; MATH 135 or MATH 145");
        sink.record(
            &DecisionRecord::new(code("CS240"), IssueKind::WouldUpdate, "CS 136; MATH 135 or MATH 145")
                .with_dept(Some("CS"))
                .with_confidence(0.82)
                .with_groups(Default::default(), groups.clone()),
        );
        sink.record(&DecisionRecord::new(code("CS241"), IssueKind::NoPrereqText, ""));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: DecisionRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.issue, IssueKind::WouldUpdate);
        assert_eq!(first.new_groups, Some(groups));
        assert_eq!(first.dept.as_deref(), Some("CS"));

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["issue"], "no_prereq_text");
        assert!(second.get("new_groups").is_none());
    }
}
