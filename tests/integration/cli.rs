//! Tests for the `stepwise` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use super::common::recorder::{unpaced, Recorder};
use stepwise::dap::{MockStop, MockValue};
use stepwise::MockDebuggee;

fn stepwise(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("stepwise").unwrap();
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("stepwise")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("sessions"))
        .stdout(predicate::str::contains("export"));
}

#[test]
fn test_sessions_on_empty_data_dir() {
    let data_dir = TempDir::new().unwrap();
    stepwise(&data_dir)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions recorded"));

    assert!(data_dir.path().join("config.toml").exists());
    assert!(data_dir.path().join("line_reports.db").exists());
}

#[test]
fn test_export_unknown_session_fails() {
    let data_dir = TempDir::new().unwrap();
    stepwise(&data_dir)
        .args(["export", "no-such-session"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_run_rejects_bad_manual_from() {
    let data_dir = TempDir::new().unwrap();
    stepwise(&data_dir)
        .args(["run", "--manual-from", "script.py", "script.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("FILE:LINE"));
}

#[tokio::test]
async fn test_recorded_session_lists_and_exports() {
    let recorder = Recorder::without_vcs();
    let script = recorder.script("count.py", "n = 1\nn += 1\n");
    let session = recorder.session(&script);
    let id = session.id.to_string();
    recorder
        .start(
            MockDebuggee::new(vec![
                MockStop::at(&script, 1),
                MockStop::at(&script, 2).var("n", MockValue::int(1)),
            ]),
            session,
            unpaced(),
            &[],
        )
        .finish()
        .await;

    let data_dir = TempDir::new().unwrap();
    stepwise(&data_dir)
        .arg("--db")
        .arg(&recorder.db_path)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("closed"))
        .stdout(predicate::str::contains("lines=2"));

    let output = data_dir.path().join("export.json");
    stepwise(&data_dir)
        .arg("--db")
        .arg(&recorder.db_path)
        .args(["export", id.as_str(), "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 2 line reports"));

    let export: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(export["session"]["session_id"], id.as_str());
    assert_eq!(export["line_reports"][1]["variables"]["n"]["value"], "1");
}
