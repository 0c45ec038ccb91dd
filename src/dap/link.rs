//! Boundary between the stepping engine and a debug adapter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a debuggee link
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Debug adapter connection lost: {0}")]
    ConnectionLost(String),
    #[error("Malformed message from debug adapter: {0}")]
    Malformed(String),
    #[error("Debug adapter rejected '{command}': {message}")]
    Rejected { command: String, message: String },
    #[error("I/O error talking to debug adapter: {0}")]
    Io(String),
}

impl LinkError {
    /// Fatal errors end the session; rejected requests only degrade the current step
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LinkError::Rejected { .. })
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => LinkError::ConnectionLost(err.to_string()),
            _ => LinkError::Io(err.to_string()),
        }
    }
}

/// Why the debuggee paused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppedEvent {
    pub thread_id: i64,
    /// Adapter stop reason (`step`, `entry`, `breakpoint`, `exception`, ...)
    pub reason: String,
    pub description: Option<String>,
    pub text: Option<String>,
}

impl StoppedEvent {
    pub fn is_exception(&self) -> bool {
        self.reason == "exception"
    }
}

/// Events the controller waits for between steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Stopped(StoppedEvent),
    Terminated { exit_code: Option<i64> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    /// Absolute path when the adapter reports one
    pub path: Option<String>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    /// Adapter hint that reading this scope is costly (e.g. globals of a large module)
    pub expensive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
    /// Non-zero when the value has children
    pub variables_reference: i64,
    pub memory_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub exception_id: String,
    pub description: Option<String>,
    /// `details.message` when the adapter provides it
    pub message: Option<String>,
}

/// A running debuggee driven one request at a time.
///
/// The controller owns the link exclusively, so methods take `&mut self`.
#[async_trait]
pub trait DebuggeeLink: Send {
    /// Block until the debuggee stops or terminates
    async fn wait_for_stop(&mut self) -> Result<LinkEvent, LinkError>;

    /// Execute one statement on a thread (`next`)
    async fn step(&mut self, thread_id: i64) -> Result<(), LinkError>;

    /// Run until the next stop (`continue`)
    async fn resume(&mut self, thread_id: i64) -> Result<(), LinkError>;

    /// Frames of a thread, innermost first
    async fn stack_trace(&mut self, thread_id: i64) -> Result<Vec<StackFrame>, LinkError>;

    async fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>, LinkError>;

    async fn variables(&mut self, variables_reference: i64) -> Result<Vec<Variable>, LinkError>;

    async fn exception_info(&mut self, thread_id: i64) -> Result<ExceptionInfo, LinkError>;

    /// End the debug session and terminate the debuggee
    async fn disconnect(&mut self) -> Result<(), LinkError>;
}
