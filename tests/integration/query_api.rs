//! HTTP API driving and reading a live session
//!
//! The router is exercised in-process with `tower::ServiceExt::oneshot`,
//! while a controller runs over a scripted debuggee.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::recorder::{unpaced, Recorder};
use stepwise::controller::{EndReason, Mode};
use stepwise::dap::MockStop;
use stepwise::web::{build_router, WebAppState};
use stepwise::{ControllerSettings, MockDebuggee, Producer};

const TOTALS: &str = "\
def total(values):
    acc = 0
    for v in values:
        acc += v
    return acc

print(total([1, 2]))
";

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn test_network_producer_drives_manual_session() {
    let recorder = Recorder::without_vcs();
    let script = recorder.script("totals.py", TOTALS);
    let session = recorder.session(&script);
    let id = session.id.to_string();

    let mut run = recorder.start(
        MockDebuggee::new(vec![
            MockStop::at(&script, 1),
            MockStop::at(&script, 7),
            MockStop::at(&script, 2).in_functions(&["total", "<module>"]),
            MockStop::at(&script, 3).in_functions(&["total", "<module>"]),
        ]),
        session,
        ControllerSettings {
            start_mode: Mode::Manual,
            ..unpaced()
        },
        &[],
    );
    let state = WebAppState::new(recorder.query()).with_control(run.control_handle());
    let app = || build_router(state.clone(), true);

    let (status, json) = get(app(), "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["live_session"], true);

    run.wait_for_prompt(1).await;
    let (status, json) = post(app(), "/api/control/commands", json!({"command": "step"})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["queued"]["command"], "step");

    let (status, _) = post(app(), "/api/control/commands", json!({"text": "s"})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    run.wait_for_prompt(2).await;

    let (status, json) = get(app(), "/api/control/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["line"], 2);
    assert_eq!(json["mode"], "manual");
    assert_eq!(json["waiting"], true);
    assert_eq!(json["lines_recorded"], 3);

    let (status, json) = post(app(), "/api/control/commands", json!({"text": "jump"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Bad Request");

    let (status, _) = post(
        app(),
        "/api/control/commands",
        json!({"command": "note", "text": "acc starts at zero"}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = post(app(), "/api/control/commands", json!({"command": "quit"})).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let outcome = run.finish().await;
    assert_eq!(
        outcome.reason,
        EndReason::Quit {
            producer: Producer::Network
        }
    );

    // The queue is gone once the session ends
    let (status, _) = post(app(), "/api/control/commands", json!({"command": "step"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = get(app(), &format!("/api/sessions/{id}/lines")).await;
    assert_eq!(status, StatusCode::OK);
    let reports = json["line_reports"].as_array().unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[2]["code"], "    acc = 0");
    assert_eq!(reports[2]["observations"][0]["text"], "acc starts at zero");
    assert_eq!(reports[2]["observations"][0]["source"], "human");
}

#[tokio::test]
async fn test_notes_and_function_context_over_recorded_session() {
    let recorder = Recorder::without_vcs();
    let script = recorder.script("totals.py", TOTALS);
    let session = recorder.session(&script);
    let id = session.id.to_string();

    recorder
        .start(
            MockDebuggee::new(vec![
                MockStop::at(&script, 1),
                MockStop::at(&script, 7),
                MockStop::at(&script, 2).in_functions(&["total", "<module>"]),
            ]),
            session,
            unpaced(),
            &[],
        )
        .finish()
        .await;

    // The script changes after the run; the snapshot still answers
    std::fs::write(&script, "print('rewritten')\n").unwrap();

    let state = WebAppState::new(recorder.query());
    let app = || build_router(state.clone(), true);

    let (status, json) = get(app(), &format!("/api/sessions/{id}/lines?offset=2&limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    let line_id = json["line_reports"][0]["id"].as_i64().unwrap();
    assert_eq!(json["line_reports"][0]["line_number"], 2);

    let (status, json) = post(
        app(),
        &format!("/api/lines/{line_id}/notes"),
        json!({"note": "first iteration"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["observations"][0]["source"], "agent");

    let (status, json) = post(
        app(),
        &format!("/api/lines/{line_id}/notes"),
        json!({"note": "still fine", "source": "llm"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let notes = json["observations"].as_array().unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[1]["source"], "llm");

    let (status, _) = post(app(), "/api/lines/999999/notes", json!({"note": "x"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!(
        "/api/sessions/{id}/function?file={}&line=2",
        script.display()
    );
    let (status, json) = get(app(), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["function"]["name"], "total");
    assert_eq!(json["function"]["signature"], "def total(values):");
    assert_eq!(json["function"]["body"], "");

    let (status, json) = get(app(), &format!("{uri}&mode=full")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["function"]["body"]
        .as_str()
        .unwrap()
        .contains("return acc"));

    let (status, _) = get(app(), &format!("{uri}&mode=outline")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = get(app(), &format!("/api/sessions/{id}/export")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["session"]["total_lines"], 3);
    assert_eq!(json["line_reports"].as_array().unwrap().len(), 3);

    // No live session attached to this server
    let (status, _) = get(app(), "/api/control/state").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_live_function_lookup_becomes_ready() {
    let recorder = Recorder::without_vcs();
    let script = recorder.script("totals.py", TOTALS);
    let session = recorder.session(&script);

    let mut run = recorder.start(
        MockDebuggee::new(vec![
            MockStop::at(&script, 1),
            MockStop::at(&script, 4).in_functions(&["total", "<module>"]),
        ]),
        session,
        ControllerSettings {
            start_mode: Mode::Manual,
            ..unpaced()
        },
        &["s"],
    );
    run.wait_for_prompt(4).await;
    let state = WebAppState::new(recorder.query()).with_control(run.control_handle());

    let mut ready = None;
    for _ in 0..50 {
        let (status, json) = get(build_router(state.clone(), true), "/api/control/function").await;
        assert_eq!(status, StatusCode::OK);
        if json["status"] == "ready" {
            ready = Some(json);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let json = ready.expect("function context never became ready");
    assert_eq!(json["function"]["name"], "total");
    assert_eq!(json["function"]["start_line"], 1);

    run.commands.send_text("q").unwrap();
    run.finish().await;
}
