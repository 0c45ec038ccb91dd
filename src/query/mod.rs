//! Read access to recorded sessions, plus note appends
//!
//! This is the surface an agent uses to diagnose a crash after the fact.
//! Arguments arrive as loosely-typed request values and are validated here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::{parse_function_context, FunctionContext};
use crate::data::{
    DatabaseError, LineReport, LineReportFilter, LineStatus, NoteSource, Observation,
    SessionExport, SessionId, SessionStore, SessionSummary,
};
use crate::session::SessionContext;
use crate::source::{SourceError, SourceResolver};

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

pub type QueryResult<T> = Result<T, QueryError>;

/// Paging bounds for line report listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: 200,
            max_limit: 1000,
        }
    }
}

/// Optional arguments of `list_line_reports`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineReportQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub file: Option<String>,
}

#[derive(Clone)]
pub struct QueryService {
    store: SessionStore,
    resolver: SourceResolver,
    limits: QueryLimits,
}

impl QueryService {
    pub fn new(store: SessionStore, resolver: SourceResolver, limits: QueryLimits) -> Self {
        Self {
            store,
            resolver,
            limits,
        }
    }

    pub fn limits(&self) -> QueryLimits {
        self.limits
    }

    /// Most recently active first
    pub fn list_sessions(&self) -> QueryResult<Vec<SessionSummary>> {
        Ok(self.store.list_sessions()?)
    }

    pub fn get_session(&self, session_id: &str) -> QueryResult<SessionSummary> {
        let id = parse_session_id(session_id)?;
        self.store
            .get_session(&id)?
            .ok_or_else(|| QueryError::NotFound(format!("Session {session_id}")))
    }

    /// Reports in id order, filtered and paged
    pub fn list_line_reports(&self, session_id: &str, query: &LineReportQuery) -> QueryResult<Vec<LineReport>> {
        let session = self.get_session(session_id)?;

        let offset = match query.offset {
            None => 0,
            Some(offset) if offset < 0 => {
                return Err(QueryError::InvalidArgument(format!("offset must not be negative, got {offset}")));
            }
            Some(offset) => u32::try_from(offset).unwrap_or(u32::MAX),
        };
        let limit = match query.limit {
            None => self.limits.default_limit,
            Some(limit) if limit <= 0 => {
                return Err(QueryError::InvalidArgument(format!("limit must be positive, got {limit}")));
            }
            Some(limit) => u32::try_from(limit).unwrap_or(u32::MAX),
        }
        .min(self.limits.max_limit);

        let status = query
            .status
            .as_deref()
            .map(str::parse::<LineStatus>)
            .transpose()
            .map_err(QueryError::InvalidArgument)?;
        let file = query
            .file
            .as_deref()
            .map(|f| session_path(&session, Path::new(f)));

        let filter = LineReportFilter { status, file };
        Ok(self
            .store
            .list_line_reports(&session.session_id, &filter, offset, limit)?)
    }

    pub fn get_line_report(&self, id: i64) -> QueryResult<LineReport> {
        self.store
            .get_line_report(id)?
            .ok_or_else(|| QueryError::NotFound(format!("Line report {id}")))
    }

    /// Error reports in id order
    pub fn get_crashes(&self, session_id: &str) -> QueryResult<Vec<LineReport>> {
        let session = self.get_session(session_id)?;
        Ok(self.store.get_crashes(&session.session_id)?)
    }

    /// Append a note and return the updated report
    pub fn add_note(&self, line_report_id: i64, note: &str, source: &str) -> QueryResult<LineReport> {
        let text = note.trim();
        if text.is_empty() {
            return Err(QueryError::InvalidArgument("note must not be empty".to_string()));
        }
        let source: NoteSource = source.parse().map_err(QueryError::InvalidArgument)?;

        let observation = Observation::new(source, text);
        if !self.store.append_observation(line_report_id, &observation)? {
            return Err(QueryError::NotFound(format!("Line report {line_report_id}")));
        }
        tracing::info!(line_report_id, source = source.as_str(), "Note added");
        self.get_line_report(line_report_id)
    }

    pub fn export_session(&self, session_id: &str) -> QueryResult<SessionExport> {
        let id = parse_session_id(session_id)?;
        self.store
            .export_session(&id)?
            .ok_or_else(|| QueryError::NotFound(format!("Session {session_id}")))
    }

    /// Enclosing function of a line, read from the source the session executed.
    /// Without `full` only the signature is returned.
    pub fn function_context(
        &self,
        session_id: &str,
        file: &str,
        line: u32,
        full: bool,
    ) -> QueryResult<Option<FunctionContext>> {
        if line == 0 {
            return Err(QueryError::InvalidArgument("line numbers start at 1".to_string()));
        }
        let summary = self.get_session(session_id)?;
        let context = SessionContext::from_summary(&summary);
        let path = session_path(&summary, Path::new(file));

        let source = match self.resolver.resolve(&path, &context) {
            Ok(source) => source,
            Err(SourceError::Unavailable(path)) => {
                return Err(QueryError::NotFound(format!("Source for {}", path.display())));
            }
            Err(SourceError::Store(e)) => return Err(e.into()),
        };

        Ok(parse_function_context(&source.text, line).map(|mut ctx| {
            if !full {
                ctx.body.clear();
                ctx.truncated = false;
            }
            ctx
        }))
    }
}

fn parse_session_id(raw: &str) -> QueryResult<SessionId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(QueryError::InvalidArgument("session id must not be empty".to_string()));
    }
    Ok(SessionId::from_string(trimmed.to_string()))
}

/// Relative paths are taken relative to the directory of the session's target
fn session_path(session: &SessionSummary, file: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    match session.file.parent() {
        Some(dir) => dir.join(file),
        None => file.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::VariableDelta;
    use crate::data::{Database, NewLineReport};
    use crate::git::SourceControl;
    use crate::data::Provenance;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct NoVcs;

    impl SourceControl for NoVcs {
        fn provenance(&self, _path: &Path) -> Option<Provenance> {
            None
        }

        fn file_at_commit(&self, _root: &Path, _commit: &str, _path: &Path) -> Option<String> {
            None
        }
    }

    fn service() -> (QueryService, SessionStore) {
        let db = Database::open_in_memory().unwrap();
        let store = SessionStore::new(db.connection());
        let resolver = SourceResolver::new(store.clone(), Arc::new(NoVcs));
        (
            QueryService::new(store.clone(), resolver, QueryLimits::default()),
            store,
        )
    }

    fn record(store: &SessionStore, id: &SessionId, file: &str, line: u32, status: LineStatus) -> LineReport {
        store
            .append_line_report(NewLineReport {
                session_id: id.clone(),
                file: PathBuf::from(file),
                line_number: line,
                code: format!("line_{line}()"),
                timestamp: Utc::now(),
                variables: BTreeMap::new(),
                variables_delta: VariableDelta::default(),
                stack_depth: 1,
                thread_id: 1,
                status,
                error: None,
            })
            .unwrap()
    }

    fn session(store: &SessionStore) -> SessionId {
        let ctx = SessionContext::new(PathBuf::from("/t/app.py"), None);
        store.create_session(&ctx.to_summary()).unwrap();
        ctx.id
    }

    #[test]
    fn test_error_filter_returns_exact_rows_within_limit() {
        let (svc, store) = service();
        let id = session(&store);
        let mut errors = Vec::new();
        for line in 1..=30 {
            let status = if line % 3 == 0 { LineStatus::Error } else { LineStatus::Success };
            let report = record(&store, &id, "/t/app.py", line, status);
            if status == LineStatus::Error {
                errors.push(report.id);
            }
        }

        let query = LineReportQuery {
            status: Some("error".into()),
            limit: Some(4),
            ..Default::default()
        };
        let page: Vec<i64> = svc
            .list_line_reports(id.as_str(), &query)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(page, errors[..4].to_vec());

        let query = LineReportQuery {
            status: Some("error".into()),
            offset: Some(8),
            ..Default::default()
        };
        let tail = svc.list_line_reports(id.as_str(), &query).unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail.iter().all(|r| r.status == LineStatus::Error));
    }

    #[test]
    fn test_limit_is_capped() {
        let (svc, store) = service();
        let id = session(&store);
        for line in 1..=5 {
            record(&store, &id, "/t/app.py", line, LineStatus::Success);
        }
        let capped = QueryService {
            limits: QueryLimits {
                default_limit: 2,
                max_limit: 3,
            },
            ..svc
        };
        assert_eq!(capped.list_line_reports(id.as_str(), &LineReportQuery::default()).unwrap().len(), 2);
        let query = LineReportQuery {
            limit: Some(50),
            ..Default::default()
        };
        assert_eq!(capped.list_line_reports(id.as_str(), &query).unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_arguments() {
        let (svc, store) = service();
        let id = session(&store);
        let report = record(&store, &id, "/t/app.py", 1, LineStatus::Success);

        let bad = [
            LineReportQuery {
                offset: Some(-1),
                ..Default::default()
            },
            LineReportQuery {
                limit: Some(0),
                ..Default::default()
            },
            LineReportQuery {
                status: Some("crashed".into()),
                ..Default::default()
            },
        ];
        for query in &bad {
            assert!(matches!(
                svc.list_line_reports(id.as_str(), query),
                Err(QueryError::InvalidArgument(_))
            ));
        }
        assert!(matches!(
            svc.add_note(report.id, "  ", "human"),
            Err(QueryError::InvalidArgument(_))
        ));
        assert!(matches!(
            svc.add_note(report.id, "hm", "robot"),
            Err(QueryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let (svc, _store) = service();
        assert!(matches!(svc.get_session("nope"), Err(QueryError::NotFound(_))));
        assert!(matches!(svc.get_crashes("nope"), Err(QueryError::NotFound(_))));
        assert!(matches!(svc.get_line_report(42), Err(QueryError::NotFound(_))));
        assert!(matches!(svc.add_note(42, "x", "llm"), Err(QueryError::NotFound(_))));
        assert!(matches!(svc.export_session("nope"), Err(QueryError::NotFound(_))));
    }

    #[test]
    fn test_two_notes_keep_order_and_timestamps() {
        let (svc, store) = service();
        let id = session(&store);
        let report = record(&store, &id, "/t/app.py", 1, LineStatus::Error);

        svc.add_note(report.id, "divides by zero", "llm").unwrap();
        let updated = svc.add_note(report.id, "confirmed", "human").unwrap();

        assert_eq!(updated.observations.len(), 2);
        assert_eq!(updated.observations[0].text, "divides by zero");
        assert_eq!(updated.observations[0].source, NoteSource::Llm);
        assert_eq!(updated.observations[1].source, NoteSource::Human);
        assert!(updated.observations[0].timestamp <= updated.observations[1].timestamp);
    }

    #[test]
    fn test_crashes_and_export() {
        let (svc, store) = service();
        let id = session(&store);
        record(&store, &id, "/t/app.py", 1, LineStatus::Success);
        let crash = record(&store, &id, "/t/app.py", 2, LineStatus::Error);

        let crashes = svc.get_crashes(id.as_str()).unwrap();
        assert_eq!(crashes.iter().map(|r| r.id).collect::<Vec<_>>(), vec![crash.id]);

        let export = svc.export_session(id.as_str()).unwrap();
        assert_eq!(export.line_reports.len(), 2);
        assert_eq!(export.crashes.len(), 1);
        assert_eq!(export.session.errors, 1);
    }

    #[test]
    fn test_file_filter_accepts_relative_paths() {
        let (svc, store) = service();
        let id = session(&store);
        record(&store, &id, "/t/app.py", 1, LineStatus::Success);
        record(&store, &id, "/t/lib.py", 7, LineStatus::Success);

        let query = LineReportQuery {
            file: Some("lib.py".into()),
            ..Default::default()
        };
        let reports = svc.list_line_reports(id.as_str(), &query).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].line_number, 7);
    }

    #[test]
    fn test_function_context_from_snapshot() {
        let (svc, store) = service();
        let id = session(&store);
        store
            .add_file_snapshot(&id, Path::new("/t/app.py"), "def main():\n    x = 1\n    return x\n")
            .unwrap();

        let sig = svc.function_context(id.as_str(), "/t/app.py", 2, false).unwrap().unwrap();
        assert_eq!(sig.name, "main");
        assert_eq!(sig.signature, "def main():");
        assert!(sig.body.is_empty());

        let full = svc.function_context(id.as_str(), "app.py", 3, true).unwrap().unwrap();
        assert!(full.body.contains("return x"));

        assert!(matches!(
            svc.function_context(id.as_str(), "/t/missing.py", 1, false),
            Err(QueryError::NotFound(_))
        ));
    }
}
