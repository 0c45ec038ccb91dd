//! Provenance and source resolution against real git repositories
//!
//! Tests verify that sessions record the commit and dirty flag of the
//! debugged script, and that the executed source is recovered from the
//! snapshot or the commit even after the working file changes.

use std::sync::Arc;

use super::common::git_fixtures::TestRepo;
use super::common::recorder::{unpaced, Recorder};
use stepwise::controller::SnapshotPolicy;
use stepwise::dap::MockStop;
use stepwise::data::Provenance;
use stepwise::source::SourceOrigin;
use stepwise::{ControllerSettings, GitCli, MockDebuggee, SessionContext, SourceControl};

const SCRIPT: &str = "def greet(name):\n    return 'hi ' + name\n\nprint(greet('x'))\n";

fn dirty_only() -> ControllerSettings {
    ControllerSettings {
        snapshot_policy: SnapshotPolicy::DirtyOnly,
        ..unpaced()
    }
}

fn program(script: &std::path::Path) -> MockDebuggee {
    MockDebuggee::new(vec![
        MockStop::at(script, 1),
        MockStop::at(script, 4),
        MockStop::at(script, 2).in_functions(&["greet", "<module>"]),
    ])
}

#[test]
fn test_git_cli_reports_clean_and_dirty_trees() {
    let (repo, script) = TestRepo::with_script("app.py", SCRIPT);
    let git = GitCli::new();

    let clean = git.provenance(&script).unwrap();
    assert_eq!(clean.repo_root, repo.path);
    assert_eq!(clean.commit_hash.as_deref(), Some(repo.head_sha().as_str()));
    assert!(!clean.dirty);

    repo.create_file("scratch.py", "pass\n");
    assert!(git.provenance(&script).unwrap().dirty);

    let committed = git
        .file_at_commit(&repo.path, &repo.head_sha(), &script)
        .unwrap();
    assert_eq!(committed, SCRIPT);
    assert!(git
        .file_at_commit(&repo.path, &repo.head_sha(), &repo.path.join("scratch.py"))
        .is_none());
}

#[tokio::test]
async fn test_clean_session_resolves_from_commit() {
    let (repo, script) = TestRepo::with_script("app.py", SCRIPT);
    let recorder = Recorder::new(Arc::new(GitCli::new()));
    let session = recorder.session(&script);
    let id = session.id.to_string();

    let outcome = recorder
        .start(program(&script), session.clone(), dirty_only(), &[])
        .finish()
        .await;
    assert_eq!(outcome.lines_recorded, 3);

    let query = recorder.query();
    let summary = query.get_session(&id).unwrap();
    assert_eq!(summary.commit_hash.as_deref(), Some(repo.head_sha().as_str()));
    assert!(!summary.dirty_flag);
    assert!(recorder
        .store
        .get_file_snapshot(&session.id, &script)
        .unwrap()
        .is_none());

    // Editing the file afterwards does not change what the session executed
    repo.create_file("app.py", "print('edited')\n");
    let source = recorder.resolver.resolve(&script, &session).unwrap();
    assert_eq!(source.origin, SourceOrigin::Commit);
    assert_eq!(source.text, SCRIPT);

    let function = query
        .function_context(&id, "app.py", 2, false)
        .unwrap()
        .unwrap();
    assert_eq!(function.name, "greet");
    assert_eq!(function.signature, "def greet(name):");
}

#[tokio::test]
async fn test_dirty_session_snapshots_at_first_touch() {
    let (repo, script) = TestRepo::with_script("app.py", SCRIPT);
    repo.create_file("notes.txt", "wip\n");
    let recorder = Recorder::new(Arc::new(GitCli::new()));
    let session = recorder.session(&script);
    assert!(session.provenance.as_ref().unwrap().dirty);

    recorder
        .start(program(&script), session.clone(), dirty_only(), &[])
        .finish()
        .await;

    let snapshot = recorder
        .store
        .get_file_snapshot(&session.id, &script)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.content, SCRIPT);

    repo.create_file("app.py", "print('edited')\n");
    let source = recorder.resolver.resolve(&script, &session).unwrap();
    assert_eq!(source.origin, SourceOrigin::Snapshot);
    assert_eq!(source.text, SCRIPT);
}

#[test]
fn test_dirty_session_without_snapshot_never_uses_commit() {
    let (repo, script) = TestRepo::with_script("app.py", SCRIPT);
    repo.create_file("app.py", "print('working tree')\n");
    let recorder = Recorder::new(Arc::new(GitCli::new()));

    let session = SessionContext::new(
        script.clone(),
        Some(Provenance {
            repo_root: repo.path.clone(),
            commit_hash: Some(repo.head_sha()),
            dirty: true,
        }),
    );
    let source = recorder.resolver.resolve(&script, &session).unwrap();
    assert_eq!(source.origin, SourceOrigin::Disk);
    assert_eq!(source.text, "print('working tree')\n");

    std::fs::remove_file(&script).unwrap();
    assert!(recorder.resolver.resolve(&script, &session).is_err());
}
