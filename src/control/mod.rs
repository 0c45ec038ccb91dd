//! Control surface: the command queue, its producers and the live view

pub mod command;
pub mod extractor;
pub mod keyboard;
pub mod queue;
pub mod speech;
pub mod state;
pub mod voice;

use std::path::Path;

use tokio::sync::watch;

pub use command::{Command, ControlError};
pub use extractor::{
    parse_function_context, ExtractionDone, FunctionContext, FunctionContextExtractor, Lookup,
};
pub use keyboard::{read_commands, spawn_keyboard_reader};
pub use queue::{command_queue, CommandReceiver, CommandSender, Producer, QueuedCommand};
pub use speech::speakable;
pub use state::{LiveState, LiveView, SOURCE_PLACEHOLDER};
pub use voice::{
    spawn_narrator, spawn_voice_loop, CommandRecognizer, CommandSpeaker, Recognizer, Speaker,
};

use crate::session::SessionContext;
use crate::source::{SourceError, SourceResolver};

/// What a network surface needs to drive and watch a live session
#[derive(Clone)]
pub struct ControlHandle {
    pub sender: CommandSender,
    pub live: watch::Receiver<LiveView>,
    pub extractor: FunctionContextExtractor,
    pub resolver: SourceResolver,
    pub session: SessionContext,
}

impl ControlHandle {
    pub fn current(&self) -> LiveView {
        self.live.borrow().clone()
    }

    /// Non-blocking function-context lookup against the session's source
    pub fn function_context(&self, file: &Path, line: u32) -> Result<Lookup, SourceError> {
        let source = self.resolver.resolve(file, &self.session)?;
        Ok(self.extractor.lookup(file, line, &source))
    }
}
