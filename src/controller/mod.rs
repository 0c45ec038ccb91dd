//! Stepping controller: mode state machine and the per-step loop

mod mode;
mod stepper;

pub use mode::{ManualTrigger, Mode, ModeMachine};
pub use stepper::{ControllerSettings, EndReason, SessionOutcome, SnapshotPolicy, SteppingController};
