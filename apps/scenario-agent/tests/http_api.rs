//! End-to-end tests of the control surface, driving the real lifecycle
//! manager against stub external tools.

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::util::ServiceExt;

use scenario_agent::{config::Config, handlers::build_router, state::AppState};

/// Config pointing the lifecycle at stub tools: `true` accepts any compose
/// invocation, the proxy binary does not exist, and all delays are removed.
fn test_config(work_dir: &TempDir) -> Config {
    Config {
        compose_bin: "true".to_string(),
        proxy_bin: "definitely-not-a-real-binary".to_string(),
        work_dir: work_dir.path().to_path_buf(),
        relay_warmup_secs: 0,
        proxy_probe_delay_secs: 0,
        terminate_grace_secs: 1,
        registration_timeout_secs: 1,
        ..Config::default()
    }
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn start_body(name: &str) -> Value {
    json!({
        "compose_content": "services:\n  sim:\n    image: busybox\n",
        "scenario_name": name,
    })
}

fn work_dir_entries(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path()).unwrap().count()
}

#[tokio::test]
async fn stop_without_active_scenario_is_rejected() {
    let work_dir = TempDir::new().unwrap();
    let app = build_router(AppState::new(test_config(&work_dir)));

    let (status, body) = request(&app, "POST", "/api/scenario/stop", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn start_stop_round_trip_updates_status_and_cleans_up() {
    let work_dir = TempDir::new().unwrap();
    let state = AppState::new(test_config(&work_dir));
    let mut events = state.events.subscribe();
    let app = build_router(state);

    let (status, _) = request(&app, "POST", "/api/scenario/start", Some(start_body("net-lab"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");
    assert_eq!(body["current_scenario"], "net-lab");
    assert_eq!(body["status_message"], "Running scenario: net-lab");
    assert_eq!(work_dir_entries(&work_dir), 1);

    let (status, _) = request(&app, "POST", "/api/scenario/stop", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert!(body["current_scenario"].is_null());
    // The materialized definition must not outlive the scenario.
    assert_eq!(work_dir_entries(&work_dir), 0);

    // No display port was given, so the proxy supervisor was never invoked:
    // had it been, its missing binary would have produced a diagnostic.
    while let Ok(event) = events.try_recv() {
        let text = serde_json::to_string(&event).unwrap();
        assert!(
            !text.contains("display proxy"),
            "proxy supervisor was invoked: {text}"
        );
    }
}

#[tokio::test]
async fn second_start_conflicts_and_keeps_first_scenario() {
    let work_dir = TempDir::new().unwrap();
    let app = build_router(AppState::new(test_config(&work_dir)));

    let (status, _) = request(&app, "POST", "/api/scenario/start", Some(start_body("first"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        request(&app, "POST", "/api/scenario/start", Some(start_body("second"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (_, body) = request(&app, "GET", "/api/status", None).await;
    assert_eq!(body["state"], "running");
    assert_eq!(body["current_scenario"], "first");
}

#[tokio::test]
async fn failed_launch_rolls_back_to_idle() {
    let work_dir = TempDir::new().unwrap();
    let mut config = test_config(&work_dir);
    config.compose_bin = "false".to_string();
    let app = build_router(AppState::new(config));

    let (status, body) =
        request(&app, "POST", "/api/scenario/start", Some(start_body("doomed"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal");

    let (_, body) = request(&app, "GET", "/api/status", None).await;
    assert_eq!(body["state"], "idle");
    assert!(body["current_scenario"].is_null());
    // Rollback removed the materialized definition.
    assert_eq!(work_dir_entries(&work_dir), 0);
}

#[tokio::test]
async fn missing_compose_binary_is_reported_without_crashing() {
    let work_dir = TempDir::new().unwrap();
    let mut config = test_config(&work_dir);
    config.compose_bin = "definitely-not-a-real-binary".to_string();
    let app = build_router(AppState::new(config));

    let (status, body) =
        request(&app, "POST", "/api/scenario/start", Some(start_body("lab"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("definitely-not-a-real-binary"));

    let (_, body) = request(&app, "GET", "/api/status", None).await;
    assert_eq!(body["state"], "idle");
    assert_eq!(work_dir_entries(&work_dir), 0);
}

#[tokio::test]
async fn teardown_failure_still_reaches_idle_and_cleans_up() {
    let work_dir = TempDir::new().unwrap();
    // A compose stand-in that succeeds for everything except `down`.
    let script = work_dir.path().join("fake-compose.sh");
    std::fs::write(
        &script,
        "#!/bin/sh\nfor arg in \"$@\"; do\n  if [ \"$arg\" = down ]; then\n    echo 'simulated teardown failure' >&2\n    exit 1\n  fi\ndone\nexit 0\n",
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let scenario_dir = TempDir::new().unwrap();
    let mut config = test_config(&scenario_dir);
    config.compose_bin = script.to_string_lossy().into_owned();
    let app = build_router(AppState::new(config));

    let (status, _) = request(&app, "POST", "/api/scenario/start", Some(start_body("lab"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&app, "POST", "/api/scenario/stop", Some(json!({}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("simulated teardown failure"));

    // Best-effort cleanup always wins: idle state, definition removed.
    let (_, body) = request(&app, "GET", "/api/status", None).await;
    assert_eq!(body["state"], "idle");
    assert!(body["current_scenario"].is_null());
    assert_eq!(work_dir_entries(&scenario_dir), 0);

    // A fresh start is possible again.
    let (status, _) = request(&app, "POST", "/api/scenario/start", Some(start_body("lab2"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn connect_failure_does_not_block_scenario_start() {
    let work_dir = TempDir::new().unwrap();
    let app = build_router(AppState::new(test_config(&work_dir)));

    // Port 9 on localhost refuses connections.
    let (status, _) = request(
        &app,
        "POST",
        "/api/connect",
        Some(json!({
            "display_name": "desk-1",
            "orchestrator_address": "127.0.0.1:9"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (_, body) = request(&app, "GET", "/api/status", None).await;
    assert_eq!(body["connected"], false);
    assert_eq!(body["status_message"], "Disconnected");

    // Start does not require a connected orchestrator.
    let (status, _) = request(&app, "POST", "/api/scenario/start", Some(start_body("lab"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn empty_definition_is_rejected_before_any_launch() {
    let work_dir = TempDir::new().unwrap();
    let app = build_router(AppState::new(test_config(&work_dir)));

    let (status, _) = request(
        &app,
        "POST",
        "/api/scenario/start",
        Some(json!({ "compose_content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = request(&app, "GET", "/api/status", None).await;
    assert_eq!(body["state"], "idle");
    assert_eq!(work_dir_entries(&work_dir), 0);
}

#[tokio::test]
async fn scenario_name_defaults_when_absent() {
    let work_dir = TempDir::new().unwrap();
    let app = build_router(AppState::new(test_config(&work_dir)));

    let (status, _) = request(
        &app,
        "POST",
        "/api/scenario/start",
        Some(json!({ "compose_content": "services: {}\n" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = request(&app, "GET", "/api/status", None).await;
    assert_eq!(body["current_scenario"], "vm-scenario");
}
