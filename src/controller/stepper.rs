//! The per-step loop driving one debug session

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::mode::{ManualTrigger, Mode, ModeMachine};
use crate::capture::{Capture, CaptureEngine, CaptureLimits};
use crate::control::{
    Command, CommandReceiver, ControlError, ExtractionDone, FunctionContextExtractor, LiveState,
    LiveView, Lookup, Producer, QueuedCommand, SOURCE_PLACEHOLDER,
};
use crate::dap::{DebuggeeLink, LinkError, LinkEvent, StoppedEvent};
use crate::data::{
    DatabaseError, LineStatus, NewLineReport, NoteSource, Observation, Provenance, SessionId,
    SessionStore,
};
use crate::session::SessionContext;
use crate::source::{ResolvedSource, SourceResolver};

/// Which files get a snapshot at first touch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    /// Every file the session executes
    #[default]
    Always,
    /// Only when the tree is dirty or not under version control
    DirtyOnly,
}

impl SnapshotPolicy {
    pub fn should_snapshot(&self, provenance: Option<&Provenance>) -> bool {
        match self {
            SnapshotPolicy::Always => true,
            SnapshotPolicy::DirtyOnly => provenance.map_or(true, |p| p.dirty || p.commit_hash.is_none()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Mode selected by the operator; ignored when `manual_from` is set
    pub start_mode: Mode,
    pub manual_from: Option<ManualTrigger>,
    /// Delay between steps in auto mode
    pub pacing: Duration,
    pub snapshot_policy: SnapshotPolicy,
    pub limits: CaptureLimits,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            start_mode: Mode::Auto,
            manual_from: None,
            pacing: Duration::from_millis(400),
            snapshot_policy: SnapshotPolicy::default(),
            limits: CaptureLimits::default(),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EndReason {
    Exited { code: Option<i64> },
    Quit { producer: Producer },
    ChannelClosed,
    LinkLost { cause: String },
    StoreFailed { cause: String },
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Exited { code: Some(code) } => write!(f, "debuggee exited with code {code}"),
            EndReason::Exited { code: None } => f.write_str("debuggee terminated"),
            EndReason::Quit { producer } => write!(f, "quit by {producer}"),
            EndReason::ChannelClosed => f.write_str("command channel closed"),
            EndReason::LinkLost { cause } => write!(f, "lost debug adapter connection: {cause}"),
            EndReason::StoreFailed { cause } => write!(f, "store failure: {cause}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub reason: EndReason,
    pub lines_recorded: u64,
}

/// What to do at a step boundary
enum Advance {
    Step,
    Resume,
    End(EndReason),
}

enum Wake {
    Command(Option<QueuedCommand>),
    Extraction(Result<ExtractionDone, broadcast::error::RecvError>),
}

/// Owns the link and performs the only writes of a running session
pub struct SteppingController<L: DebuggeeLink> {
    link: L,
    store: SessionStore,
    resolver: SourceResolver,
    extractor: FunctionContextExtractor,
    extraction_events: broadcast::Receiver<ExtractionDone>,
    commands: CommandReceiver,
    live: LiveState,
    session: SessionContext,
    engine: CaptureEngine,
    modes: ModeMachine,
    settings: ControllerSettings,
    /// Source pinned at first touch; `None` when it could not be resolved
    pinned: HashMap<PathBuf, Option<ResolvedSource>>,
    lines_recorded: u64,
    latest_report_id: Option<i64>,
}

impl<L: DebuggeeLink> SteppingController<L> {
    pub fn new(
        link: L,
        store: SessionStore,
        resolver: SourceResolver,
        commands: CommandReceiver,
        session: SessionContext,
        settings: ControllerSettings,
    ) -> Self {
        let modes = ModeMachine::new(settings.start_mode, settings.manual_from.clone());
        let live = LiveState::new(LiveView::new(session.id.clone(), modes.mode()));
        let extractor = FunctionContextExtractor::new();
        Self {
            link,
            store,
            resolver,
            extraction_events: extractor.subscribe(),
            extractor,
            commands,
            live,
            session,
            engine: CaptureEngine::new(settings.limits),
            modes,
            settings,
            pinned: HashMap::new(),
            lines_recorded: 0,
            latest_report_id: None,
        }
    }

    /// Share an extractor (and its cache) with other surfaces
    pub fn with_extractor(mut self, extractor: FunctionContextExtractor) -> Self {
        self.extraction_events = extractor.subscribe();
        self.extractor = extractor;
        self
    }

    pub fn extractor(&self) -> &FunctionContextExtractor {
        &self.extractor
    }

    pub fn live_state(&self) -> &LiveState {
        &self.live
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Record the session from its first stop until it ends
    pub async fn run(mut self) -> Result<SessionOutcome, DatabaseError> {
        self.store.create_session(&self.session.to_summary())?;
        tracing::info!(
            session_id = %self.session.id,
            target = %self.session.target.display(),
            mode = %self.modes.mode(),
            "Debug session started"
        );

        let reason = self.drive().await;
        Ok(self.finish(reason))
    }

    async fn drive(&mut self) -> EndReason {
        loop {
            let event = match self.link.wait_for_stop().await {
                Ok(event) => event,
                Err(e) => return e.into(),
            };
            let stop = match event {
                LinkEvent::Terminated { exit_code } => return EndReason::Exited { code: exit_code },
                LinkEvent::Stopped(stop) => stop,
            };

            if let Err(reason) = self.record_stop(&stop).await {
                return reason;
            }

            let advance = match self.modes.mode() {
                Mode::Auto => self.auto_boundary().await,
                Mode::Manual | Mode::Terminated => self.await_command().await,
            };

            let sent = match advance {
                Advance::Step => self.link.step(stop.thread_id).await,
                Advance::Resume => self.link.resume(stop.thread_id).await,
                Advance::End(reason) => return reason,
            };
            if let Err(e) = sent {
                tracing::error!(session_id = %self.session.id, error = %e, "Step failed");
                return e.into();
            }
        }
    }

    /// Capture, persist and publish one stop
    async fn record_stop(&mut self, stop: &StoppedEvent) -> Result<(), EndReason> {
        let capture = match self.engine.capture(&mut self.link, stop).await {
            Ok(capture) => capture,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session.id,
                    error = %e,
                    "Stop unreadable, recording warning"
                );
                let file = self
                    .live
                    .current()
                    .file
                    .unwrap_or_else(|| self.session.target.clone());
                Capture::unreadable(stop, file, &e)
            }
        };
        let point = &capture.point;

        self.modes.observe_stop(&point.file, point.line);
        if capture.status == LineStatus::Error && self.modes.mode() == Mode::Auto {
            tracing::info!(file = %point.file.display(), line = point.line, "Error stop, pausing");
            self.modes.set_manual();
        }

        self.pin_source(&point.file);
        let pinned = self.pinned.get(&point.file).and_then(Option::as_ref);
        let (code, function_context) = match pinned {
            Some(source) => {
                let code = source.line(point.line).unwrap_or_default().to_string();
                let context = match self.extractor.lookup(&point.file, point.line, source) {
                    Lookup::Ready(context) => context,
                    Lookup::Pending => None,
                };
                (Some(code), context)
            }
            None => (None, None),
        };

        let report = self.build_report(&capture, code.clone().unwrap_or_default());
        let stored = self.store.append_line_report(report).map_err(|e| {
            tracing::error!(session_id = %self.session.id, error = %e, "Failed to record line");
            EndReason::StoreFailed { cause: e.to_string() }
        })?;
        self.lines_recorded += 1;
        self.latest_report_id = Some(stored.id);

        tracing::debug!(
            session_id = %self.session.id,
            report_id = stored.id,
            file = %point.file.display(),
            line = point.line,
            status = %capture.status.as_str(),
            "Recorded line"
        );

        let mode = self.modes.mode();
        let lines_recorded = self.lines_recorded;
        let Capture {
            point,
            variables,
            delta,
            status,
            error,
        } = capture;
        self.live.update(|view| {
            view.mode = mode;
            view.file = Some(point.file);
            view.line = Some(point.line);
            view.code = Some(code.unwrap_or_else(|| SOURCE_PLACEHOLDER.to_string()));
            view.variables = variables;
            view.delta = delta;
            view.status = Some(status);
            view.error = error;
            view.function_context = function_context;
            view.lines_recorded = lines_recorded;
            view.latest_report_id = Some(stored.id);
        });
        Ok(())
    }

    fn build_report(&self, capture: &Capture, code: String) -> NewLineReport {
        NewLineReport {
            session_id: self.session.id.clone(),
            file: capture.point.file.clone(),
            line_number: capture.point.line,
            code,
            timestamp: Utc::now(),
            variables: capture.variables.clone(),
            variables_delta: capture.delta.clone(),
            stack_depth: capture.point.depth,
            thread_id: capture.point.thread_id,
            status: capture.status,
            error: capture.error.clone(),
        }
    }

    /// Resolve `file` once per session
    fn pin_source(&mut self, file: &Path) {
        if file.as_os_str().is_empty() || self.pinned.contains_key(file) {
            return;
        }
        let resolved = self.first_touch(file);
        self.pinned.insert(file.to_path_buf(), resolved);
    }

    fn first_touch(&self, file: &Path) -> Option<ResolvedSource> {
        if self
            .settings
            .snapshot_policy
            .should_snapshot(self.session.provenance.as_ref())
        {
            match std::fs::read_to_string(file) {
                Ok(content) => match self.store.add_file_snapshot(&self.session.id, file, &content) {
                    Ok(inserted) => {
                        tracing::debug!(file = %file.display(), inserted, "Snapshot taken");
                    }
                    Err(e) => tracing::warn!(file = %file.display(), error = %e, "Failed to store snapshot"),
                },
                Err(e) => tracing::debug!(file = %file.display(), error = %e, "Nothing to snapshot"),
            }
        }

        match self.resolver.resolve(file, &self.session) {
            Ok(source) => {
                tracing::debug!(file = %file.display(), origin = ?source.origin, "Pinned source");
                Some(source)
            }
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "Source unavailable");
                None
            }
        }
    }

    /// Auto mode: pace, then take at most one queued command as an interrupt
    async fn auto_boundary(&mut self) -> Advance {
        if !self.settings.pacing.is_zero() {
            tokio::time::sleep(self.settings.pacing).await;
        }
        let queued = match self.commands.try_recv() {
            Ok(Some(queued)) => queued,
            // Auto mode keeps going without producers
            Ok(None) | Err(ControlError::QueueClosed) => return Advance::Step,
            Err(ControlError::InvalidCommand(_)) => return Advance::Step,
        };
        tracing::info!(command = %queued.command, producer = %queued.producer, "Interrupt in auto mode");

        match queued.command {
            Command::Step | Command::Pause => {
                self.modes.set_manual();
                self.await_command().await
            }
            Command::AutoOn => Advance::Step,
            Command::Continue => Advance::Resume,
            Command::Quit => self.quit(queued.producer).await,
            Command::Note { text } => {
                self.add_note(&text);
                Advance::Step
            }
        }
    }

    /// Manual mode: block until a command advances or ends the session
    async fn await_command(&mut self) -> Advance {
        self.live.update(|view| {
            view.mode = Mode::Manual;
            view.waiting = true;
        });

        let advance = loop {
            let wake = tokio::select! {
                queued = self.commands.recv() => Wake::Command(queued),
                done = self.extraction_events.recv() => Wake::Extraction(done),
            };

            let queued = match wake {
                Wake::Command(Some(queued)) => queued,
                Wake::Command(None) => break Advance::End(EndReason::ChannelClosed),
                Wake::Extraction(Ok(done)) => {
                    self.apply_extraction(done);
                    continue;
                }
                Wake::Extraction(Err(_)) => continue,
            };
            tracing::info!(command = %queued.command, producer = %queued.producer, "Command");

            match queued.command {
                Command::Step => break Advance::Step,
                Command::AutoOn => {
                    self.modes.set_auto();
                    break Advance::Step;
                }
                Command::Continue => break Advance::Resume,
                Command::Pause => continue,
                Command::Quit => break self.quit(queued.producer).await,
                Command::Note { text } => self.add_note(&text),
            }
        };

        let mode = self.modes.mode();
        self.live.update(|view| {
            view.mode = mode;
            view.waiting = false;
        });
        advance
    }

    /// Show a finished background parse if it is for the current line
    fn apply_extraction(&self, done: ExtractionDone) {
        self.live.update(|view| {
            if view.file.as_deref() == Some(done.file.as_path()) && view.line == Some(done.line) {
                view.function_context = done.context;
            }
        });
    }

    fn add_note(&self, text: &str) {
        let Some(report_id) = self.latest_report_id else {
            tracing::warn!(session_id = %self.session.id, "No line recorded yet, note dropped");
            return;
        };
        let observation = Observation::new(NoteSource::Human, text);
        match self.store.append_observation(report_id, &observation) {
            Ok(true) => tracing::info!(report_id, "Note added"),
            Ok(false) => tracing::warn!(report_id, "Line report vanished, note dropped"),
            Err(e) => tracing::error!(report_id, error = %e, "Failed to add note"),
        }
    }

    async fn quit(&mut self, producer: Producer) -> Advance {
        if let Err(e) = self.link.disconnect().await {
            tracing::warn!(error = %e, "Disconnect failed");
        }
        Advance::End(EndReason::Quit { producer })
    }

    fn finish(mut self, reason: EndReason) -> SessionOutcome {
        self.modes.terminate();
        match self.store.end_session(&self.session.id, Utc::now()) {
            Ok(_) => {}
            Err(e) => tracing::error!(session_id = %self.session.id, error = %e, "Failed to close session"),
        }
        tracing::info!(
            session_id = %self.session.id,
            reason = %reason,
            lines = self.lines_recorded,
            "Debug session ended"
        );

        let text = reason.to_string();
        self.live.update(|view| {
            view.mode = Mode::Terminated;
            view.waiting = false;
            view.end_reason = Some(text);
        });

        SessionOutcome {
            session_id: self.session.id.clone(),
            reason,
            lines_recorded: self.lines_recorded,
        }
    }
}

impl From<LinkError> for EndReason {
    fn from(err: LinkError) -> Self {
        EndReason::LinkLost { cause: err.to_string() }
    }
}
