//! Debug Adapter Protocol link to the debuggee

pub mod adapter;
pub mod client;
pub mod link;
pub mod mock;
pub mod transport;

pub use adapter::{launch, AdapterSettings, LaunchTarget};
pub use client::DapClient;
pub use link::{
    DebuggeeLink, ExceptionInfo, LinkError, LinkEvent, Scope, StackFrame, StoppedEvent, Variable,
};
pub use mock::{MockDebuggee, MockHandle, MockStop, MockValue};
