//! Capture and diff of debuggee variable state

mod diff;
mod engine;
mod value;

pub use diff::{compute_delta, Bindings, ValueChange, VariableDelta};
pub use engine::{ActivationKey, Capture, CaptureEngine, CaptureLimits, StopPoint};
pub use value::{CapturedValue, SummaryCause};
