//! REST API route definitions.

use axum::{
    routing::{get, post},
    Router,
};

use crate::web::handlers::{control, lines, sessions};
use crate::web::state::WebAppState;

/// Build the API router with all REST endpoints.
pub fn api_routes() -> Router<WebAppState> {
    Router::new()
        // Session routes
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/{id}", get(sessions::get_session))
        .route("/sessions/{id}/lines", get(sessions::list_line_reports))
        .route("/sessions/{id}/crashes", get(sessions::get_crashes))
        .route("/sessions/{id}/export", get(sessions::export_session))
        .route("/sessions/{id}/function", get(sessions::get_function_context))
        // Line report routes
        .route("/lines/{id}", get(lines::get_line_report))
        .route("/lines/{id}/notes", post(lines::add_note))
        // Live session routes
        .route("/control/state", get(control::get_state))
        .route("/control/commands", post(control::post_command))
        .route("/control/function", get(control::get_function))
}
