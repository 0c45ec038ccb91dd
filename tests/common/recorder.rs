//! Runs a `SteppingController` over a `MockDebuggee` against a file-backed store

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stepwise::control::{
    command_queue, CommandSender, ControlHandle, FunctionContextExtractor, LiveView,
};
use stepwise::data::{DatabaseError, Provenance};
use stepwise::query::QueryLimits;
use stepwise::{
    ControllerSettings, Database, MockDebuggee, QueryService, SessionContext, SessionOutcome,
    SessionStore, SourceControl, SourceResolver, SteppingController,
};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Source control that knows no repositories
pub struct NoVcs;

impl SourceControl for NoVcs {
    fn provenance(&self, _path: &Path) -> Option<Provenance> {
        None
    }

    fn file_at_commit(&self, _root: &Path, _commit: &str, _path: &Path) -> Option<String> {
        None
    }
}

/// Owns a database file under a temp dir
pub struct Recorder {
    dir: TempDir,
    pub db_path: PathBuf,
    pub store: SessionStore,
    pub resolver: SourceResolver,
    vcs: Arc<dyn SourceControl>,
}

impl Recorder {
    pub fn new(vcs: Arc<dyn SourceControl>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = dir.path().join("line_reports.db");
        let db = Database::open(db_path.clone()).expect("Failed to open database");
        let store = SessionStore::new(db.connection());
        let resolver = SourceResolver::new(store.clone(), Arc::clone(&vcs));
        Self {
            dir,
            db_path,
            store,
            resolver,
            vcs,
        }
    }

    pub fn without_vcs() -> Self {
        Self::new(Arc::new(NoVcs))
    }

    /// Write a script next to the database
    pub fn script(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// A session for `target` with its provenance looked up
    pub fn session(&self, target: &Path) -> SessionContext {
        SessionContext::new(target.to_path_buf(), self.vcs.provenance(target))
    }

    pub fn query(&self) -> QueryService {
        QueryService::new(
            self.store.clone(),
            self.resolver.clone(),
            QueryLimits::default(),
        )
    }

    /// Spawn a controller. `queued` commands are sent before it starts.
    pub fn start(
        &self,
        debuggee: MockDebuggee,
        session: SessionContext,
        settings: ControllerSettings,
        queued: &[&str],
    ) -> LiveRun {
        let (commands, receiver) = command_queue();
        for text in queued {
            commands.send_text(text).unwrap();
        }
        let extractor = FunctionContextExtractor::new();
        let controller = SteppingController::new(
            debuggee,
            self.store.clone(),
            self.resolver.clone(),
            receiver,
            session.clone(),
            settings,
        )
        .with_extractor(extractor.clone());
        let live = controller.live_state().subscribe();
        let task = tokio::spawn(controller.run());

        LiveRun {
            commands,
            live,
            extractor,
            resolver: self.resolver.clone(),
            session,
            task,
        }
    }
}

/// Controller settings without pacing
pub fn unpaced() -> ControllerSettings {
    ControllerSettings {
        pacing: Duration::ZERO,
        ..ControllerSettings::default()
    }
}

pub struct LiveRun {
    pub commands: CommandSender,
    pub live: watch::Receiver<LiveView>,
    pub extractor: FunctionContextExtractor,
    pub resolver: SourceResolver,
    pub session: SessionContext,
    task: JoinHandle<Result<SessionOutcome, DatabaseError>>,
}

impl LiveRun {
    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            sender: self.commands.clone(),
            live: self.live.clone(),
            extractor: self.extractor.clone(),
            resolver: self.resolver.clone(),
            session: self.session.clone(),
        }
    }

    /// Wait until the controller blocks for a command at `line`
    pub async fn wait_for_prompt(&mut self, line: u32) -> LiveView {
        tokio::time::timeout(
            Duration::from_secs(5),
            self.live.wait_for(|v| v.waiting && v.line == Some(line)),
        )
        .await
        .expect("Timed out waiting for the controller")
        .expect("Controller dropped its live state")
        .clone()
    }

    pub async fn finish(self) -> SessionOutcome {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("Timed out waiting for the session to end")
            .expect("Controller task panicked")
            .expect("Session store failed")
    }
}
