//! End-to-end stepping sessions over a scripted debuggee
//!
//! Tests verify that a run records one report per executed line, that error
//! stops leave the session open for the operator, and that the recorded
//! trace survives reopening the database.

use std::path::Path;
use std::sync::Arc;

use super::common::recorder::{unpaced, NoVcs, Recorder};
use stepwise::capture::CapturedValue;
use stepwise::control::Command;
use stepwise::controller::{EndReason, Mode};
use stepwise::dap::{MockStop, MockValue};
use stepwise::data::{LineStatus, NoteSource, SessionStore};
use stepwise::query::{LineReportQuery, QueryLimits};
use stepwise::{ControllerSettings, Database, MockDebuggee, Producer, QueryService, SourceResolver};

const FIVE_LINES: &str = "a = 1\nb = 2\nc = a + b\nd = c * 2\nprint(d)\n";

fn five_line_program(script: &Path) -> Vec<MockStop> {
    vec![
        MockStop::at(script, 1),
        MockStop::at(script, 2).var("a", MockValue::int(1)),
        MockStop::at(script, 3)
            .var("a", MockValue::int(1))
            .var("b", MockValue::int(2)),
        MockStop::at(script, 4)
            .var("a", MockValue::int(1))
            .var("b", MockValue::int(2))
            .var("c", MockValue::int(3)),
        MockStop::at(script, 5)
            .var("a", MockValue::int(1))
            .var("b", MockValue::int(2))
            .var("c", MockValue::int(3))
            .var("d", MockValue::int(6)),
    ]
}

#[tokio::test]
async fn test_straight_program_survives_reopen() {
    let recorder = Recorder::without_vcs();
    let script = recorder.script("five.py", FIVE_LINES);
    let session = recorder.session(&script);
    let session_id = session.id.to_string();

    let run = recorder.start(
        MockDebuggee::new(five_line_program(&script)),
        session,
        unpaced(),
        &[],
    );
    let outcome = run.finish().await;
    assert_eq!(outcome.reason, EndReason::Exited { code: Some(0) });
    assert_eq!(outcome.lines_recorded, 5);

    // A fresh connection sees the same trace
    let db = Database::open(recorder.db_path.clone()).unwrap();
    let store = SessionStore::new(db.connection());
    let query = QueryService::new(
        store.clone(),
        SourceResolver::new(store, Arc::new(NoVcs)),
        QueryLimits::default(),
    );

    let summary = query.get_session(&session_id).unwrap();
    assert!(summary.is_closed());
    assert_eq!(summary.total_lines, 5);
    assert_eq!(summary.successes, 5);
    assert_eq!(summary.errors, 0);

    let reports = query
        .list_line_reports(&session_id, &LineReportQuery::default())
        .unwrap();
    let ids: Vec<i64> = reports.iter().map(|r| r.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    let lines: Vec<u32> = reports.iter().map(|r| r.line_number).collect();
    assert_eq!(lines, vec![1, 2, 3, 4, 5]);
    assert_eq!(reports[4].code, "print(d)");
    assert_eq!(
        reports[4].variables["d"],
        CapturedValue::scalar("6", Some("int".into()))
    );
    assert_eq!(reports[3].variables_delta.added.len(), 1);
    assert!(reports[3].variables_delta.changed.is_empty());
}

#[tokio::test]
async fn test_raise_on_line_three_waits_for_operator() {
    let recorder = Recorder::without_vcs();
    let script = recorder.script("raise.py", FIVE_LINES);
    let session = recorder.session(&script);
    let session_id = session.id.to_string();

    let mut run = recorder.start(
        MockDebuggee::new(vec![
            MockStop::at(&script, 1),
            MockStop::at(&script, 2).var("a", MockValue::int(1)),
            MockStop::at(&script, 3)
                .var("a", MockValue::int(1))
                .raising("ZeroDivisionError", "division by zero"),
            MockStop::at(&script, 4),
            MockStop::at(&script, 5),
        ]),
        session,
        unpaced(),
        &[],
    );

    let view = run.wait_for_prompt(3).await;
    assert_eq!(view.mode, Mode::Manual);
    assert_eq!(view.status, Some(LineStatus::Error));

    let query = recorder.query();
    let summary = query.get_session(&session_id).unwrap();
    assert!(!summary.is_closed());
    let crashes = query.get_crashes(&session_id).unwrap();
    assert_eq!(crashes.len(), 1);
    assert_eq!(crashes[0].line_number, 3);
    assert_eq!(crashes[0].error_type.as_deref(), Some("ZeroDivisionError"));
    assert_eq!(crashes[0].error_message.as_deref(), Some("division by zero"));

    // Resuming past the exception lets the program die
    run.commands.send(Command::Continue).unwrap();
    let outcome = run.finish().await;
    assert!(matches!(outcome.reason, EndReason::Exited { .. }));
    assert_eq!(outcome.lines_recorded, 3);

    let errors = query
        .list_line_reports(
            &session_id,
            &LineReportQuery {
                status: Some("error".to_string()),
                ..LineReportQuery::default()
            },
        )
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert!(query.get_session(&session_id).unwrap().is_closed());
}

#[tokio::test]
async fn test_manual_session_with_notes_and_quit() {
    let recorder = Recorder::without_vcs();
    let script = recorder.script("manual.py", FIVE_LINES);
    let session = recorder.session(&script);
    let session_id = session.id.to_string();

    let mut run = recorder.start(
        MockDebuggee::new(five_line_program(&script)),
        session,
        ControllerSettings {
            start_mode: Mode::Manual,
            ..unpaced()
        },
        &["s", "note b is next"],
    );

    run.wait_for_prompt(2).await;
    run.commands.send_text("q").unwrap();
    let outcome = run.finish().await;
    assert_eq!(
        outcome.reason,
        EndReason::Quit {
            producer: Producer::Internal
        }
    );
    assert_eq!(outcome.lines_recorded, 2);

    let query = recorder.query();
    let reports = query
        .list_line_reports(&session_id, &LineReportQuery::default())
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].observations.len(), 1);
    assert_eq!(reports[1].observations[0].text, "b is next");
    assert_eq!(reports[1].observations[0].source, NoteSource::Human);

    // Notes stay appendable after the session closed
    let updated = query.add_note(reports[0].id, "entry looked fine", "llm").unwrap();
    assert_eq!(updated.observations.len(), 1);
    assert_eq!(updated.observations[0].source, NoteSource::Llm);
}

#[tokio::test]
async fn test_two_sessions_keep_separate_traces() {
    let recorder = Recorder::without_vcs();
    let script = recorder.script("twice.py", FIVE_LINES);

    let first = recorder.session(&script);
    let first_id = first.id.to_string();
    recorder
        .start(MockDebuggee::new(five_line_program(&script)), first, unpaced(), &[])
        .finish()
        .await;

    let second = recorder.session(&script);
    let second_id = second.id.to_string();
    recorder
        .start(
            MockDebuggee::new(five_line_program(&script)[..2].to_vec()),
            second,
            unpaced(),
            &[],
        )
        .finish()
        .await;

    let query = recorder.query();
    let sessions = query.list_sessions().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(query.get_session(&first_id).unwrap().total_lines, 5);
    assert_eq!(query.get_session(&second_id).unwrap().total_lines, 2);

    let export = query.export_session(&second_id).unwrap();
    assert_eq!(export.line_reports.len(), 2);
    assert!(export
        .line_reports
        .iter()
        .all(|r| r.session_id.to_string() == second_id));
}
