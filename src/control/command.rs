//! Operator commands and their text forms

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Command queue is closed")]
    QueueClosed,
    #[error("Unknown command: '{0}'")]
    InvalidCommand(String),
}

/// What the operator asked the controller to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Execute one statement
    Step,
    /// Switch to auto mode and keep stepping
    AutoOn,
    /// Run to the next breakpoint or exception
    Continue,
    /// Switch to manual mode at the next step boundary
    Pause,
    /// End the session
    Quit,
    /// Attach a note to the latest line report
    Note { text: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Step => "step",
            Command::AutoOn => "auto",
            Command::Continue => "continue",
            Command::Pause => "pause",
            Command::Quit => "quit",
            Command::Note { .. } => "note",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Note { text } => write!(f, "note {text}"),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for Command {
    type Err = ControlError;

    /// Keyboard and voice vocabulary; an empty line means step
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        if let Some(rest) = note_body(trimmed) {
            if rest.is_empty() {
                return Err(ControlError::InvalidCommand(trimmed.to_string()));
            }
            return Ok(Command::Note {
                text: rest.to_string(),
            });
        }

        match trimmed.to_lowercase().as_str() {
            "" | "s" | "step" | "next" | "n" => Ok(Command::Step),
            "a" | "auto" | "auto on" | "autoon" => Ok(Command::AutoOn),
            "c" | "continue" | "run" => Ok(Command::Continue),
            "p" | "pause" | "manual" | "stop" => Ok(Command::Pause),
            "q" | "quit" | "exit" | "stop debugging" => Ok(Command::Quit),
            _ => Err(ControlError::InvalidCommand(trimmed.to_string())),
        }
    }
}

/// Text after a leading `note` keyword, if the input is a note
fn note_body(input: &str) -> Option<&str> {
    let head = input.get(..4)?;
    if !head.eq_ignore_ascii_case("note") {
        return None;
    }
    let rest = &input[4..];
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix([' ', ':']).map(str::trim)
}
