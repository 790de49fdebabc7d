// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `fleetmux` binary as a subprocess, the way the
//! supervisor does: random token and port via environment, readiness via
//! `/health` polling and the `Running on` stdout line.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `fleetmux` binary.
pub fn fleetmux_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("fleetmux")
}

/// Grab a free local port by binding and releasing an ephemeral listener.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running fleetmux subprocess, killed on drop.
pub struct FleetmuxProcess {
    child: Child,
    port: u16,
    pub token: String,
    stdout_path: PathBuf,
    _dir: tempfile::TempDir,
}

impl FleetmuxProcess {
    /// Spawn the binary with a fresh token and port.
    pub fn start() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let stdout_path = dir.path().join("stdout.log");
        let stderr_path = dir.path().join("stderr.log");

        let port = free_port()?;
        let token = uuid::Uuid::new_v4().simple().to_string();

        let child = Command::new(fleetmux_binary())
            .env("APP_TOKEN", &token)
            .env("PORT", port.to_string())
            .env("HOST", "127.0.0.1")
            .env("FLEETMUX_LOG", "info")
            .env("HEARTBEAT_TIMEOUT_S", "120")
            .stdin(Stdio::null())
            .stdout(File::create(&stdout_path)?)
            .stderr(File::create(stderr_path)?)
            .spawn()?;

        Ok(Self { child, port, token, stdout_path, _dir: dir })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_events_url(&self) -> String {
        format!("ws://127.0.0.1:{}/v1/events?token={}", self.port, self.token)
    }

    /// Poll `/health` until it reports healthy, the way the supervisor does.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/health", self.base_url());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(resp) = reqwest::get(&url).await {
                if resp.status().is_success() {
                    return Ok(resp.json().await?);
                }
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("fleetmux never became healthy; stdout:\n{}", self.stdout());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Everything the process wrote to stdout so far.
    pub fn stdout(&self) -> String {
        std::fs::read_to_string(&self.stdout_path).unwrap_or_default()
    }

    /// An authenticated API client.
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }
}

impl Drop for FleetmuxProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
