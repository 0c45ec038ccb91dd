//! Recorded session handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::control::FunctionContext;
use crate::data::{LineReport, SessionExport, SessionSummary};
use crate::query::LineReportQuery;
use crate::web::error::WebError;
use crate::web::state::WebAppState;

/// Response for listing sessions.
#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize)]
pub struct ListLineReportsResponse {
    pub line_reports: Vec<LineReport>,
}

#[derive(Debug, Serialize)]
pub struct CrashesResponse {
    pub crashes: Vec<LineReport>,
}

/// Query for the function enclosing a recorded line.
#[derive(Debug, Deserialize)]
pub struct FunctionQuery {
    pub file: String,
    pub line: u32,
    /// `sig` (default) or `full`
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FunctionResponse {
    pub function: Option<FunctionContext>,
}

/// List all sessions, most recent activity first.
pub async fn list_sessions(
    State(state): State<WebAppState>,
) -> Result<Json<ListSessionsResponse>, WebError> {
    let sessions = state.query().list_sessions()?;
    Ok(Json(ListSessionsResponse { sessions }))
}

/// Get a single session by ID.
pub async fn get_session(
    State(state): State<WebAppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, WebError> {
    Ok(Json(state.query().get_session(&id)?))
}

/// Line reports of a session in execution order.
pub async fn list_line_reports(
    State(state): State<WebAppState>,
    Path(id): Path<String>,
    Query(query): Query<LineReportQuery>,
) -> Result<Json<ListLineReportsResponse>, WebError> {
    let line_reports = state.query().list_line_reports(&id, &query)?;
    Ok(Json(ListLineReportsResponse { line_reports }))
}

pub async fn get_crashes(
    State(state): State<WebAppState>,
    Path(id): Path<String>,
) -> Result<Json<CrashesResponse>, WebError> {
    let crashes = state.query().get_crashes(&id)?;
    Ok(Json(CrashesResponse { crashes }))
}

/// The whole session as one document.
pub async fn export_session(
    State(state): State<WebAppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionExport>, WebError> {
    Ok(Json(state.query().export_session(&id)?))
}

pub async fn get_function_context(
    State(state): State<WebAppState>,
    Path(id): Path<String>,
    Query(query): Query<FunctionQuery>,
) -> Result<Json<FunctionResponse>, WebError> {
    let full = match query.mode.as_deref() {
        None | Some("sig") => false,
        Some("full") => true,
        Some(other) => {
            return Err(WebError::BadRequest(format!(
                "Invalid mode: {other}. Must be one of: sig, full"
            )))
        }
    };
    let function = state
        .query()
        .function_context(&id, &query.file, query.line, full)?;
    Ok(Json(FunctionResponse { function }))
}
