//! Voice producer and spoken narration
//!
//! Speech engines are external. A [`Recognizer`] yields phrases and a
//! [`Speaker`] says text; both block, so they run off the async runtime.

use std::io::{self, BufRead, BufReader};
use std::process::{Child, ChildStdout, Command as ProcessCommand, Stdio};
use std::sync::Arc;
use std::thread;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::command::ControlError;
use super::queue::{CommandSender, Producer};
use super::state::LiveView;

/// Text-to-speech engine
pub trait Speaker: Send + Sync {
    fn speak(&self, text: &str) -> io::Result<()>;
}

/// Speech-recognition engine. `None` ends the voice loop.
pub trait Recognizer: Send {
    fn recognize(&mut self) -> Option<String>;
}

/// Runs an external TTS program with the text as its last argument
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    /// `command` is the program followed by its fixed arguments
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&self, text: &str) -> io::Result<()> {
        let status = ProcessCommand::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(io::Error::other(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        Ok(())
    }
}

/// Reads one recognized phrase per line from an external process
pub struct CommandRecognizer {
    child: Child,
    lines: io::Lines<BufReader<ChildStdout>>,
}

impl CommandRecognizer {
    pub fn spawn(command: &[String]) -> io::Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty recognizer command"))?;
        let mut child = ProcessCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("recognizer stdout not captured"))?;
        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
        })
    }
}

impl Recognizer for CommandRecognizer {
    fn recognize(&mut self) -> Option<String> {
        match self.lines.next()? {
            Ok(line) => Some(line),
            Err(e) => {
                tracing::warn!(error = %e, "Recognizer output unreadable");
                None
            }
        }
    }
}

impl Drop for CommandRecognizer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Feed recognized phrases into the queue on a dedicated thread.
/// The thread returns how many commands it queued.
pub fn spawn_voice_loop(
    mut recognizer: Box<dyn Recognizer>,
    sender: &CommandSender,
) -> io::Result<thread::JoinHandle<usize>> {
    let sender = sender.for_producer(Producer::Voice);
    thread::Builder::new()
        .name("stepwise-voice".to_string())
        .spawn(move || {
            let mut queued = 0;
            while let Some(phrase) = recognizer.recognize() {
                let phrase = phrase.trim().trim_end_matches(['.', '!', '?']).to_string();
                if phrase.is_empty() {
                    continue;
                }
                match sender.send_text(&phrase) {
                    Ok(command) => {
                        tracing::info!(phrase = %phrase, command = %command, "Voice command");
                        queued += 1;
                    }
                    Err(ControlError::QueueClosed) => break,
                    Err(e) => tracing::debug!(phrase = %phrase, error = %e, "Unrecognized voice phrase"),
                }
            }
            queued
        })
}

/// Speak each new step, with code syntax read out as words.
/// Updates arriving while speaking collapse to the latest.
pub fn spawn_narrator(speaker: Arc<dyn Speaker>, mut rx: watch::Receiver<LiveView>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_spoken: Option<String> = None;
        loop {
            let text = rx.borrow_and_update().spoken_narration();
            if let Some(text) = text {
                if last_spoken.as_deref() != Some(text.as_str()) {
                    let speaker = Arc::clone(&speaker);
                    let spoken = text.clone();
                    match tokio::task::spawn_blocking(move || speaker.speak(&spoken)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(error = %e, "Narration failed"),
                        Err(e) => tracing::warn!(error = %e, "Narration task panicked"),
                    }
                    last_spoken = Some(text);
                }
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
