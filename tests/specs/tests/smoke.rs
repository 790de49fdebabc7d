// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `fleetmux` binary and drive
//! the supervisor handshake, auth, and a full command round trip over TCP.

use std::process::{Command, Stdio};
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use fleetmux::error::ErrorCode;
use fleetmux_specs::{fleetmux_binary, FleetmuxProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

// -- Supervisor handshake -----------------------------------------------------

#[tokio::test]
async fn health_handshake_and_readiness_line() -> anyhow::Result<()> {
    let proc = FleetmuxProcess::start()?;
    let health = proc.wait_healthy(TIMEOUT).await?;

    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "fleetmux");
    assert!(health["version"].is_string());
    assert!(health["timestamp"].is_string());

    // Legacy readiness indicator on stdout.
    assert!(proc.stdout().contains("Running on"), "stdout:\n{}", proc.stdout());
    Ok(())
}

#[tokio::test]
async fn missing_token_exits_with_code_2() -> anyhow::Result<()> {
    let status = Command::new(fleetmux_binary())
        .env_remove("APP_TOKEN")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    assert_eq!(status.code(), Some(2));
    Ok(())
}

#[tokio::test]
async fn short_token_exits_with_code_2() -> anyhow::Result<()> {
    let status = Command::new(fleetmux_binary())
        .env("APP_TOKEN", "too-short")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    assert_eq!(status.code(), Some(2));
    Ok(())
}

// -- Auth ---------------------------------------------------------------------

#[tokio::test]
async fn api_requires_bearer_token() -> anyhow::Result<()> {
    let proc = FleetmuxProcess::start()?;
    proc.wait_healthy(TIMEOUT).await?;
    let client = proc.client();

    let resp = client.get(format!("{}/v1/robots", proc.base_url())).send().await?;
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["code"], ErrorCode::Unauthorized.as_str());
    assert_eq!(body["message"], "Missing Authorization header");

    let resp = client
        .get(format!("{}/v1/robots", proc.base_url()))
        .bearer_auth("wrong-token-wrong-token")
        .send()
        .await?;
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["message"], "Invalid token");

    let resp = client
        .get(format!("{}/v1/robots", proc.base_url()))
        .bearer_auth(&proc.token)
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    Ok(())
}

// -- Full round trip ----------------------------------------------------------

/// Serve a one-route mock robot that answers every exec with `{"ok":true}`.
async fn spawn_mock_robot() -> anyhow::Result<String> {
    let router = axum::Router::new().route(
        "/exec",
        axum::routing::post(|| async { axum::Json(serde_json::json!({"ok": true})) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}/exec"))
}

#[tokio::test]
async fn submit_dispatch_and_event_stream_round_trip() -> anyhow::Result<()> {
    let proc = FleetmuxProcess::start()?;
    proc.wait_healthy(TIMEOUT).await?;
    let client = proc.client();
    let endpoint = spawn_mock_robot().await?;

    // Watch the event stream from before the submit.
    let (ws, _) = tokio_tungstenite::connect_async(proc.ws_events_url()).await?;
    let (_tx, mut rx) = ws.split();

    // Register the robot.
    let resp = client
        .post(format!("{}/v1/robots/register", proc.base_url()))
        .bearer_auth(&proc.token)
        .json(&serde_json::json!({
            "robot_id": "r1",
            "robot_type": "rover",
            "protocol": "http",
            "endpoint": endpoint,
            "capabilities": ["robot.stop"],
            "status": "online"
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);

    // Submit a command.
    let resp = client
        .post(format!("{}/v1/command", proc.base_url()))
        .bearer_auth(&proc.token)
        .json(&serde_json::json!({
            "trace_id": "11111111-2222-4333-8444-555555555555",
            "timestamp": "2026-08-01T12:00:00Z",
            "actor": {"type": "human", "id": "op-1"},
            "source": "api",
            "command": {
                "id": "c1",
                "type": "robot.stop",
                "target": {"robot_id": "r1"},
                "params": {},
                "priority": "normal",
                "timeout_ms": 5000
            }
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), 202);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["command"]["status"], "pending");

    // Poll until the record settles.
    let url = format!("{}/v1/command/c1", proc.base_url());
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let record = loop {
        let record: serde_json::Value =
            client.get(&url).bearer_auth(&proc.token).send().await?.json().await?;
        if record["state"] == "succeeded" {
            break record;
        }
        anyhow::ensure!(record["state"] != "failed", "command failed: {record}");
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "command never settled");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    assert_eq!(record["result"]["ok"], true);

    // The event stream saw running then succeeded for our trace.
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while seen.len() < 2 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "events never arrived: {seen:?}");
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.next()).await;
        let Ok(Some(Ok(Message::Text(text)))) = frame else { continue };
        let event: serde_json::Value = serde_json::from_str(text.as_str())?;
        if event["trace_id"] == "11111111-2222-4333-8444-555555555555"
            && event["category"] == "command"
        {
            seen.push(event["message"].as_str().unwrap_or_default().to_owned());
        }
    }
    assert_eq!(seen, vec!["command.running".to_owned(), "command.succeeded".to_owned()]);
    Ok(())
}
