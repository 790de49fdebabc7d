// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Robot registry: who exists, how to reach them, and whether they are alive.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{CommandError, ErrorCode};
use crate::events::{EventBus, EventCategory, EventRecord, Severity};
use crate::model::{Protocol, RobotStatus};

/// Interval between offline sweeps.
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// A registered robot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotEntry {
    pub robot_id: String,
    #[serde(default)]
    pub robot_type: String,
    /// Action names this robot accepts.
    #[serde(default)]
    pub capabilities: HashSet<String>,
    pub status: RobotStatus,
    /// URL for http/websocket robots, broker topic for mqtt.
    pub endpoint: String,
    pub protocol: Protocol,
    #[serde(default = "Utc::now")]
    pub last_heartbeat: DateTime<Utc>,
    /// Credential forwarded by the HTTP adapter, if the robot requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Shared registry of robots. Entries are owned here; workers resolve
/// transient clones per dispatch step.
pub struct RobotRegistry {
    robots: RwLock<HashMap<String, RobotEntry>>,
}

impl RobotRegistry {
    pub fn new() -> Self {
        Self { robots: RwLock::new(HashMap::new()) }
    }

    /// Register or replace a robot. Returns true when the id was new.
    pub async fn register(&self, mut entry: RobotEntry) -> bool {
        entry.last_heartbeat = Utc::now();
        let mut robots = self.robots.write().await;
        robots.insert(entry.robot_id.clone(), entry).is_none()
    }

    /// Remove a robot. Returns true when it existed.
    pub async fn deregister(&self, id: &str) -> bool {
        self.robots.write().await.remove(id).is_some()
    }

    pub async fn get(&self, id: &str) -> Option<RobotEntry> {
        self.robots.read().await.get(id).cloned()
    }

    /// List robots, optionally restricted to one status.
    pub async fn list(&self, status: Option<RobotStatus>) -> Vec<RobotEntry> {
        let robots = self.robots.read().await;
        let mut entries: Vec<RobotEntry> = robots
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.robot_id.cmp(&b.robot_id));
        entries
    }

    pub async fn online_count(&self) -> usize {
        self.robots.read().await.values().filter(|r| r.status == RobotStatus::Online).count()
    }

    /// Record a heartbeat. Updates `last_heartbeat` and sets the reported
    /// status, defaulting to `online` when none is given.
    pub async fn heartbeat(
        &self,
        id: &str,
        status: Option<RobotStatus>,
    ) -> Result<RobotEntry, CommandError> {
        let mut robots = self.robots.write().await;
        let entry = robots.get_mut(id).ok_or_else(|| {
            CommandError::new(ErrorCode::RobotNotFound, "unknown robot")
                .with_details(serde_json::json!({"robot_id": id}))
        })?;
        entry.last_heartbeat = Utc::now();
        entry.status = status.unwrap_or(RobotStatus::Online);
        Ok(entry.clone())
    }

    /// Mark robots whose heartbeat is older than `timeout` as offline.
    /// Returns the ids transitioned on this sweep.
    pub async fn sweep_expired(&self, timeout: std::time::Duration) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(120));
        let mut robots = self.robots.write().await;
        let mut expired = Vec::new();
        for entry in robots.values_mut() {
            if entry.status != RobotStatus::Offline && entry.last_heartbeat < cutoff {
                entry.status = RobotStatus::Offline;
                expired.push(entry.robot_id.clone());
            }
        }
        expired
    }
}

impl Default for RobotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the background task that expires silent robots.
pub fn spawn_heartbeat_monitor(
    registry: Arc<RobotRegistry>,
    events: Arc<EventBus>,
    timeout: std::time::Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(SWEEP_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            for robot_id in registry.sweep_expired(timeout).await {
                tracing::warn!(robot_id = %robot_id, "robot missed heartbeat, marked offline");
                events.publish(
                    EventRecord::new(Severity::Warn, EventCategory::Robot, "robot.offline")
                        .with_context(serde_json::json!({
                            "robot_id": robot_id,
                            "reason": "heartbeat_timeout",
                        })),
                );
            }
        }
    });
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
