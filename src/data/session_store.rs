//! Session, line report and snapshot data access object

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::database::DatabaseError;
use super::models::{
    FileSnapshot, LineReport, LineStatus, NewLineReport, Observation, SessionExport, SessionId,
    SessionSummary,
};

const SESSION_COLUMNS: &str = "session_id, file, start_time, end_time, repo_root, commit_hash, \
     dirty_flag, total_lines, successes, errors, crashes, updated_at";

const LINE_REPORT_COLUMNS: &str = "id, session_id, file, line_number, code, timestamp, variables, \
     variables_delta, stack_depth, thread_id, status, error_type, error_message, stack_trace, \
     observations";

/// Filters for listing line reports of one session
#[derive(Debug, Clone, Default)]
pub struct LineReportFilter {
    pub status: Option<LineStatus>,
    pub file: Option<PathBuf>,
}

/// Data access object for recorded sessions
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Insert a new, open session
    pub fn create_session(&self, summary: &SessionSummary) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO session_summaries (session_id, file, start_time, end_time, repo_root, commit_hash,
                 dirty_flag, total_lines, successes, errors, crashes, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                summary.session_id.as_str(),
                path_to_string(&summary.file),
                format_time(&summary.start_time),
                summary.end_time.as_ref().map(format_time),
                summary.repo_root.as_deref().map(path_to_string),
                summary.commit_hash,
                summary.dirty_flag as i32,
                summary.total_lines,
                summary.successes,
                summary.errors,
                summary.crashes,
                format_time(&summary.updated_at),
            ],
        )?;
        tracing::info!(session_id = %summary.session_id, file = %summary.file.display(), "Created session");
        Ok(())
    }

    /// Close a session. Returns false when it was already closed or unknown.
    pub fn end_session(
        &self,
        session_id: &SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.lock()?;
        let ts = format_time(&end_time);
        let changed = conn.execute(
            "UPDATE session_summaries SET end_time = ?2, updated_at = ?2
             WHERE session_id = ?1 AND end_time IS NULL",
            params![session_id.as_str(), ts],
        )?;
        Ok(changed > 0)
    }

    /// Insert a report and bump the session counters in one transaction
    pub fn append_line_report(&self, mut report: NewLineReport) -> Result<LineReport, DatabaseError> {
        report.timestamp = report.timestamp.trunc_subsecs(6);
        let variables = serde_json::to_string(&report.variables)?;
        let delta = serde_json::to_string(&report.variables_delta)?;
        let (error_type, error_message, stack_trace) = match &report.error {
            Some(details) => (
                details.kind.clone(),
                details.message.clone(),
                details.stack_trace.clone(),
            ),
            None => (None, None, None),
        };
        let (success_inc, error_inc) = match report.status {
            LineStatus::Success => (1, 0),
            LineStatus::Error => (0, 1),
            LineStatus::Warning => (0, 0),
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let open: Option<Option<String>> = tx
            .query_row(
                "SELECT end_time FROM session_summaries WHERE session_id = ?1",
                params![report.session_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match open {
            Some(None) => {}
            Some(Some(_)) | None => {
                return Err(DatabaseError::SessionNotOpen(report.session_id.to_string()))
            }
        }

        tx.execute(
            "INSERT INTO line_reports (session_id, file, line_number, code, timestamp, variables,
                 variables_delta, stack_depth, thread_id, status, error_type, error_message, stack_trace,
                 observations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, '[]')",
            params![
                report.session_id.as_str(),
                path_to_string(&report.file),
                report.line_number,
                report.code,
                format_time(&report.timestamp),
                variables,
                delta,
                report.stack_depth,
                report.thread_id,
                report.status.as_str(),
                error_type,
                error_message,
                stack_trace,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE session_summaries
             SET total_lines = total_lines + 1,
                 successes = successes + ?2,
                 errors = errors + ?3,
                 crashes = crashes + ?3,
                 updated_at = ?4
             WHERE session_id = ?1",
            params![
                report.session_id.as_str(),
                success_inc,
                error_inc,
                format_time(&Utc::now()),
            ],
        )?;
        tx.commit()?;

        Ok(LineReport::from_new(id, report))
    }

    /// Record the first-touch copy of a file. Returns false if one already existed.
    pub fn add_file_snapshot(
        &self,
        session_id: &SessionId,
        file: &Path,
        content: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO file_snapshots (session_id, file, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session_id.as_str(),
                path_to_string(file),
                content,
                format_time(&Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_file_snapshot(
        &self,
        session_id: &SessionId,
        file: &Path,
    ) -> Result<Option<FileSnapshot>, DatabaseError> {
        let conn = self.lock()?;
        let content: Option<String> = conn
            .query_row(
                "SELECT content FROM file_snapshots WHERE session_id = ?1 AND file = ?2",
                params![session_id.as_str(), path_to_string(file)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content.map(|content| FileSnapshot {
            session_id: session_id.clone(),
            file: file.to_path_buf(),
            content,
        }))
    }

    /// All sessions, most recent activity first
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM session_summaries ORDER BY updated_at DESC, start_time DESC"
        ))?;
        let rows = stmt.query_map([], |row| Ok(Self::row_to_session(row)))?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row??);
        }
        Ok(sessions)
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Option<SessionSummary>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM session_summaries WHERE session_id = ?1"
        ))?;
        let mut rows = stmt.query(params![session_id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_session(row)?)),
            None => Ok(None),
        }
    }

    /// Reports of one session in id order
    pub fn list_line_reports(
        &self,
        session_id: &SessionId,
        filter: &LineReportFilter,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<LineReport>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LINE_REPORT_COLUMNS} FROM line_reports
             WHERE session_id = ?1
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR file = ?3)
             ORDER BY id
             LIMIT ?4 OFFSET ?5"
        ))?;
        let rows = stmt.query_map(
            params![
                session_id.as_str(),
                filter.status.map(|s| s.as_str()),
                filter.file.as_deref().map(path_to_string),
                limit,
                offset,
            ],
            |row| Ok(Self::row_to_line_report(row)),
        )?;
        let mut reports = Vec::new();
        for row in rows {
            reports.push(row??);
        }
        Ok(reports)
    }

    pub fn get_line_report(&self, id: i64) -> Result<Option<LineReport>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LINE_REPORT_COLUMNS} FROM line_reports WHERE id = ?1"
        ))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_line_report(row)?)),
            None => Ok(None),
        }
    }

    /// Latest report of a session, if any
    pub fn latest_line_report_id(&self, session_id: &SessionId) -> Result<Option<i64>, DatabaseError> {
        let conn = self.lock()?;
        let id = conn.query_row(
            "SELECT MAX(id) FROM line_reports WHERE session_id = ?1",
            params![session_id.as_str()],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(id)
    }

    /// Error reports of one session in id order
    pub fn get_crashes(&self, session_id: &SessionId) -> Result<Vec<LineReport>, DatabaseError> {
        self.list_line_reports(
            session_id,
            &LineReportFilter {
                status: Some(LineStatus::Error),
                file: None,
            },
            0,
            u32::MAX,
        )
    }

    /// Append an observation with a single statement. Returns false for an unknown id.
    pub fn append_observation(&self, id: i64, observation: &Observation) -> Result<bool, DatabaseError> {
        let encoded = serde_json::to_string(observation)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE line_reports
             SET observations = json_insert(COALESCE(observations, '[]'), '$[#]', json(?2))
             WHERE id = ?1",
            params![id, encoded],
        )?;
        Ok(changed > 0)
    }

    /// Session plus all of its reports and crashes
    pub fn export_session(&self, session_id: &SessionId) -> Result<Option<SessionExport>, DatabaseError> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(None);
        };
        let line_reports =
            self.list_line_reports(session_id, &LineReportFilter::default(), 0, u32::MAX)?;
        let crashes = line_reports
            .iter()
            .filter(|r| r.status == LineStatus::Error)
            .cloned()
            .collect();
        Ok(Some(SessionExport {
            session,
            line_reports,
            crashes,
        }))
    }

    fn row_to_session(row: &Row) -> Result<SessionSummary, DatabaseError> {
        let end_time: Option<String> = row.get(3)?;
        let repo_root: Option<String> = row.get(4)?;
        Ok(SessionSummary {
            session_id: SessionId::from_string(row.get::<_, String>(0)?),
            file: PathBuf::from(row.get::<_, String>(1)?),
            start_time: parse_time(&row.get::<_, String>(2)?)?,
            end_time: end_time.as_deref().map(parse_time).transpose()?,
            repo_root: repo_root.map(PathBuf::from),
            commit_hash: row.get(5)?,
            dirty_flag: row.get::<_, i64>(6)? != 0,
            total_lines: row.get(7)?,
            successes: row.get(8)?,
            errors: row.get(9)?,
            crashes: row.get(10)?,
            updated_at: parse_time(&row.get::<_, String>(11)?)?,
        })
    }

    fn row_to_line_report(row: &Row) -> Result<LineReport, DatabaseError> {
        let status: String = row.get(10)?;
        let variables: String = row.get(6)?;
        let delta: Option<String> = row.get(7)?;
        let observations: Option<String> = row.get(14)?;
        Ok(LineReport {
            id: row.get(0)?,
            session_id: SessionId::from_string(row.get::<_, String>(1)?),
            file: PathBuf::from(row.get::<_, String>(2)?),
            line_number: row.get(3)?,
            code: row.get(4)?,
            timestamp: parse_time(&row.get::<_, String>(5)?)?,
            variables: serde_json::from_str(&variables)?,
            variables_delta: match delta.as_deref() {
                Some(text) if !text.is_empty() => serde_json::from_str(text)?,
                _ => Default::default(),
            },
            stack_depth: row.get(8)?,
            thread_id: row.get(9)?,
            status: status.parse().map_err(DatabaseError::Corrupt)?,
            error_type: row.get(11)?,
            error_message: row.get(12)?,
            stack_trace: row.get(13)?,
            observations: match observations.as_deref() {
                Some(text) if !text.is_empty() => serde_json::from_str(text)?,
                _ => Vec::new(),
            },
        })
    }
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// RFC 3339 with microseconds so ordering by text matches ordering by time
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt(format!("bad timestamp {text:?}: {e}")))
}
