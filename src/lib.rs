pub mod capture;
pub mod config;
pub mod control;
pub mod controller;
pub mod dap;
pub mod data;
pub mod git;
pub mod query;
pub mod session;
pub mod source;
pub mod util;
pub mod web;

pub use capture::{CapturedValue, CaptureEngine, CaptureLimits, VariableDelta};
pub use config::Config;
pub use control::{command_queue, Command, ControlHandle, LiveView, Producer};
pub use controller::{ControllerSettings, EndReason, Mode, SessionOutcome, SteppingController};
pub use dap::{DapClient, DebuggeeLink, LinkError, MockDebuggee};
pub use data::{Database, LineReport, SessionId, SessionStore, SessionSummary};
pub use git::{GitCli, SourceControl};
pub use query::{QueryError, QueryService};
pub use session::SessionContext;
pub use source::{SourceError, SourceResolver};
