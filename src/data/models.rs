//! Data models for recorded debug sessions

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::{CapturedValue, VariableDelta};

/// Opaque session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source-control state of the target at session start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Repository root (work tree top level)
    pub repo_root: PathBuf,
    /// HEAD commit hash, if the repository has any commits
    pub commit_hash: Option<String>,
    /// Whether the work tree had uncommitted changes
    pub dirty: bool,
}

/// Session metadata and aggregate counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    /// Target script that was debugged
    pub file: PathBuf,
    pub start_time: DateTime<Utc>,
    /// Set when the session is closed
    pub end_time: Option<DateTime<Utc>>,
    pub repo_root: Option<PathBuf>,
    pub commit_hash: Option<String>,
    pub dirty_flag: bool,
    pub total_lines: i64,
    pub successes: i64,
    pub errors: i64,
    pub crashes: i64,
    /// Last time a report was appended or the session was closed
    pub updated_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Create an open session with zeroed counters
    pub fn new(session_id: SessionId, file: PathBuf, provenance: Option<&Provenance>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            file,
            start_time: now,
            end_time: None,
            repo_root: provenance.map(|p| p.repo_root.clone()),
            commit_hash: provenance.and_then(|p| p.commit_hash.clone()),
            dirty_flag: provenance.map(|p| p.dirty).unwrap_or(false),
            total_lines: 0,
            successes: 0,
            errors: 0,
            crashes: 0,
            updated_at: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Outcome classification of one executed line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Success,
    Error,
    Warning,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Success => "success",
            LineStatus::Error => "error",
            LineStatus::Warning => "warning",
        }
    }
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "success" => Ok(LineStatus::Success),
            "error" => Ok(LineStatus::Error),
            "warning" => Ok(LineStatus::Warning),
            other => Err(format!(
                "Invalid status: {}. Must be one of: success, error, warning",
                other
            )),
        }
    }
}

/// Who wrote an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteSource {
    Human,
    Llm,
    Agent,
}

impl NoteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteSource::Human => "human",
            NoteSource::Llm => "llm",
            NoteSource::Agent => "agent",
        }
    }
}

impl FromStr for NoteSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" => Ok(NoteSource::Human),
            "llm" => Ok(NoteSource::Llm),
            "agent" => Ok(NoteSource::Agent),
            other => Err(format!(
                "Invalid note source: {}. Must be one of: human, llm, agent",
                other
            )),
        }
    }
}

/// A timestamped, source-tagged note attached to a line report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub source: NoteSource,
    pub text: String,
}

impl Observation {
    pub fn new(source: NoteSource, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            text: text.into(),
        }
    }
}

/// Error details for a line that raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Exception kind as reported by the adapter (e.g. `ZeroDivisionError`)
    pub kind: Option<String>,
    pub message: Option<String>,
    /// One `file:line` per frame, innermost first
    pub stack_trace: Option<String>,
}

/// A report to be appended; the store assigns the id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLineReport {
    pub session_id: SessionId,
    pub file: PathBuf,
    pub line_number: u32,
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub variables: BTreeMap<String, CapturedValue>,
    pub variables_delta: VariableDelta,
    pub stack_depth: u32,
    pub thread_id: i64,
    pub status: LineStatus,
    pub error: Option<ErrorDetails>,
}

/// One recorded execution step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineReport {
    pub id: i64,
    pub session_id: SessionId,
    pub file: PathBuf,
    pub line_number: u32,
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub variables: BTreeMap<String, CapturedValue>,
    pub variables_delta: VariableDelta,
    pub stack_depth: u32,
    pub thread_id: i64,
    pub status: LineStatus,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub observations: Vec<Observation>,
}

impl LineReport {
    pub(crate) fn from_new(id: i64, report: NewLineReport) -> Self {
        let (error_type, error_message, stack_trace) = match report.error {
            Some(details) => (details.kind, details.message, details.stack_trace),
            None => (None, None, None),
        };
        Self {
            id,
            session_id: report.session_id,
            file: report.file,
            line_number: report.line_number,
            code: report.code,
            timestamp: report.timestamp,
            variables: report.variables,
            variables_delta: report.variables_delta,
            stack_depth: report.stack_depth,
            thread_id: report.thread_id,
            status: report.status,
            error_type,
            error_message,
            stack_trace,
            observations: Vec::new(),
        }
    }
}

/// First-touch copy of a source file within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub session_id: SessionId,
    pub file: PathBuf,
    pub content: String,
}

/// Full session plus ordered reports, for offline analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub session: SessionSummary,
    pub line_reports: Vec<LineReport>,
    /// Error reports only, in id order
    pub crashes: Vec<LineReport>,
}
