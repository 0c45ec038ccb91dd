//! Live session handlers: the network command producer and state view.

use std::path::PathBuf;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::control::{Command, FunctionContext, LiveView, Lookup, Producer};
use crate::source::SourceError;
use crate::web::error::WebError;
use crate::web::state::WebAppState;

/// Either a structured command or operator text such as `"s"` or `"note x"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CommandRequest {
    Command(Command),
    Text { text: String },
}

#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    pub queued: Command,
}

/// Defaults to the current stop location.
#[derive(Debug, Default, Deserialize)]
pub struct LiveFunctionQuery {
    pub file: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LiveFunctionResponse {
    /// `pending` while the background parse runs, else `ready`
    pub status: &'static str,
    pub function: Option<FunctionContext>,
}

pub async fn get_state(State(state): State<WebAppState>) -> Result<Json<LiveView>, WebError> {
    Ok(Json(state.control()?.current()))
}

/// Queue a command from the network producer.
pub async fn post_command(
    State(state): State<WebAppState>,
    Json(req): Json<CommandRequest>,
) -> Result<(StatusCode, Json<CommandAccepted>), WebError> {
    let sender = state.control()?.sender.for_producer(Producer::Network);
    let command = match req {
        CommandRequest::Command(command) => {
            sender.send(command.clone())?;
            command
        }
        CommandRequest::Text { text } => sender.send_text(&text)?,
    };
    Ok((StatusCode::ACCEPTED, Json(CommandAccepted { queued: command })))
}

pub async fn get_function(
    State(state): State<WebAppState>,
    Query(query): Query<LiveFunctionQuery>,
) -> Result<Json<LiveFunctionResponse>, WebError> {
    let control = state.control()?;
    let current = control.current();

    let file = query
        .file
        .map(PathBuf::from)
        .or(current.file)
        .ok_or_else(|| WebError::BadRequest("No file given and no current stop".to_string()))?;
    let line = query
        .line
        .or(current.line)
        .ok_or_else(|| WebError::BadRequest("No line given and no current stop".to_string()))?;

    match control.function_context(&file, line) {
        Ok(Lookup::Pending) => Ok(Json(LiveFunctionResponse {
            status: "pending",
            function: None,
        })),
        Ok(Lookup::Ready(function)) => Ok(Json(LiveFunctionResponse {
            status: "ready",
            function,
        })),
        Err(SourceError::Unavailable(path)) => Err(WebError::NotFound(format!(
            "Source for {} not found",
            path.display()
        ))),
        Err(SourceError::Store(e)) => Err(WebError::Database(e)),
    }
}
