//! Stepping mode state machine

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::util::normalize_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Wait for a command after every step
    Manual,
    /// Step on a timer, polling for interrupts
    Auto,
    Terminated,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Manual => "manual",
            Mode::Auto => "auto",
            Mode::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(file, line)` at or past which auto mode hands over to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualTrigger {
    pub file: PathBuf,
    pub line: u32,
}

impl ManualTrigger {
    pub fn new(file: impl AsRef<Path>, line: u32) -> Self {
        Self {
            file: normalize_path(file.as_ref()),
            line,
        }
    }

    pub fn matches(&self, file: &Path, line: u32) -> bool {
        line >= self.line && normalize_path(file) == self.file
    }
}

impl FromStr for ManualTrigger {
    type Err = String;

    /// Parses `FILE:LINE`; the line is split at the last colon
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (file, line) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Expected FILE:LINE, got '{s}'"))?;
        if file.is_empty() {
            return Err(format!("Missing file in '{s}'"));
        }
        let line: u32 = line
            .trim()
            .parse()
            .map_err(|_| format!("Invalid line number in '{s}'"))?;
        if line == 0 {
            return Err("Line numbers start at 1".to_string());
        }
        Ok(Self::new(file, line))
    }
}

impl fmt::Display for ManualTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// Current mode plus the one-shot manual trigger
#[derive(Debug, Clone)]
pub struct ModeMachine {
    mode: Mode,
    trigger: Option<ManualTrigger>,
    fired: bool,
}

impl ModeMachine {
    /// With a trigger the session always starts in auto
    pub fn new(requested: Mode, trigger: Option<ManualTrigger>) -> Self {
        let mode = if trigger.is_some() { Mode::Auto } else { requested };
        Self {
            mode,
            trigger,
            fired: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_terminated(&self) -> bool {
        self.mode == Mode::Terminated
    }

    pub fn trigger(&self) -> Option<&ManualTrigger> {
        self.trigger.as_ref()
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Apply the trigger to a stop. Returns true only on the stop that latches it.
    pub fn observe_stop(&mut self, file: &Path, line: u32) -> bool {
        if self.fired || self.mode != Mode::Auto {
            return false;
        }
        let Some(trigger) = &self.trigger else {
            return false;
        };
        if trigger.matches(file, line) {
            self.fired = true;
            self.mode = Mode::Manual;
            tracing::info!(trigger = %trigger, "Manual trigger reached");
            return true;
        }
        false
    }

    pub fn set_manual(&mut self) {
        if !self.is_terminated() {
            self.mode = Mode::Manual;
        }
    }

    pub fn set_auto(&mut self) {
        if !self.is_terminated() {
            self.mode = Mode::Auto;
        }
    }

    pub fn terminate(&mut self) {
        self.mode = Mode::Terminated;
    }
}
