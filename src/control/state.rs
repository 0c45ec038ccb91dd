//! Live view of the running session, published by the controller

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::watch;

use crate::capture::{Bindings, VariableDelta};
use crate::controller::Mode;
use crate::data::{ErrorDetails, LineStatus, SessionId};

use super::extractor::FunctionContext;
use super::speech::speakable;

/// Shown when the executed line's source could not be resolved
pub const SOURCE_PLACEHOLDER: &str = "<source unavailable>";

/// Snapshot of the latest step, as shown to every surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveView {
    pub session_id: SessionId,
    pub mode: Mode,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    pub code: Option<String>,
    pub variables: Bindings,
    pub delta: VariableDelta,
    pub status: Option<LineStatus>,
    pub error: Option<ErrorDetails>,
    /// True while the controller is blocked on the command queue
    pub waiting: bool,
    pub function_context: Option<FunctionContext>,
    pub lines_recorded: u64,
    pub latest_report_id: Option<i64>,
    pub end_reason: Option<String>,
}

impl LiveView {
    pub fn new(session_id: SessionId, mode: Mode) -> Self {
        Self {
            session_id,
            mode,
            file: None,
            line: None,
            code: None,
            variables: Bindings::new(),
            delta: VariableDelta::default(),
            status: None,
            error: None,
            waiting: false,
            function_context: None,
            lines_recorded: 0,
            latest_report_id: None,
            end_reason: None,
        }
    }

    /// One-line narration of the current step
    pub fn narration(&self) -> Option<String> {
        self.describe(|text| text.to_string())
    }

    /// Narration for a speech engine, with code and values spelled out
    pub fn spoken_narration(&self) -> Option<String> {
        self.describe(speakable)
    }

    fn describe(&self, render: impl Fn(&str) -> String) -> Option<String> {
        if let Some(reason) = &self.end_reason {
            return Some(format!("Session ended: {reason}"));
        }
        let line = self.line?;
        let code = self.code.as_deref().unwrap_or(SOURCE_PLACEHOLDER).trim();
        let mut text = format!("Line {line}: {}", render(code));
        if let Some(error) = &self.error {
            let kind = error.kind.as_deref().unwrap_or("error");
            match &error.message {
                Some(message) => text.push_str(&format!(". Raised {kind}: {message}")),
                None => text.push_str(&format!(". Raised {kind}")),
            }
        }
        for (name, value) in &self.delta.changed {
            text.push_str(&format!(". {name} is now {}", render(&value.new.brief(40))));
        }
        for (name, value) in &self.delta.added {
            text.push_str(&format!(". {name} = {}", render(&value.brief(40))));
        }
        for name in self.delta.removed.keys() {
            text.push_str(&format!(". {name} removed"));
        }
        Some(text)
    }
}

/// Sending half, owned by the controller
#[derive(Debug)]
pub struct LiveState {
    tx: watch::Sender<LiveView>,
}

impl LiveState {
    pub fn new(initial: LiveView) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveView> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> LiveView {
        self.tx.borrow().clone()
    }

    /// Apply a change and notify subscribers
    pub fn update(&self, apply: impl FnOnce(&mut LiveView)) {
        self.tx.send_modify(apply);
    }
}
