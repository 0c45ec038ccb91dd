//! Data persistence layer for stepwise
//!
//! This module provides SQLite-based storage for debug sessions, their
//! per-line reports and first-touch file snapshots.

mod database;
mod migrations;
mod models;
mod session_store;

pub use database::{Database, DatabaseError};
pub use models::{
    ErrorDetails, FileSnapshot, LineReport, LineStatus, NewLineReport, NoteSource, Observation,
    Provenance, SessionExport, SessionId, SessionSummary,
};
pub use session_store::{LineReportFilter, SessionStore};
