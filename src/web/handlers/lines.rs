//! Line report handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::data::LineReport;
use crate::web::error::WebError;
use crate::web::state::WebAppState;

/// Request to append a note to a line report.
#[derive(Debug, Deserialize)]
pub struct AddNoteRequest {
    pub note: String,
    /// `human`, `llm` or `agent`; defaults to `agent`
    pub source: Option<String>,
}

pub async fn get_line_report(
    State(state): State<WebAppState>,
    Path(id): Path<i64>,
) -> Result<Json<LineReport>, WebError> {
    Ok(Json(state.query().get_line_report(id)?))
}

/// Append a note and return the updated report.
pub async fn add_note(
    State(state): State<WebAppState>,
    Path(id): Path<i64>,
    Json(req): Json<AddNoteRequest>,
) -> Result<(StatusCode, Json<LineReport>), WebError> {
    let source = req.source.as_deref().unwrap_or("agent");
    let report = state.query().add_note(id, &req.note, source)?;
    Ok((StatusCode::CREATED, Json(report)))
}
