// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit and integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::model::{Actor, CommandMsg, Priority, Protocol, RobotStatus, Source};
use crate::registry::RobotEntry;
use crate::state::AppState;

/// Small, fast configuration with auth disabled.
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        app_token: None,
        queue_max_size: 1000,
        max_workers: 2,
        poll_interval_ms: 20,
        default_timeout_ms: 10_000,
        max_retries: 3,
        heartbeat_timeout_s: 120,
        shutdown_grace_s: 2,
        store_ttl_s: 3600,
        mqtt_broker: "127.0.0.1:1883".into(),
        strict_target_check: true,
    }
}

/// A fresh service container with the test configuration.
pub fn test_state() -> Arc<AppState> {
    Arc::new(AppState::new(test_config(), CancellationToken::new()))
}

/// An online robot advertising the stop/move/say actions.
pub fn test_robot(id: &str, protocol: Protocol) -> RobotEntry {
    RobotEntry {
        robot_id: id.into(),
        robot_type: "rover".into(),
        capabilities: ["robot.stop".to_owned(), "robot.move".to_owned(), "robot.say".to_owned()]
            .into_iter()
            .collect(),
        status: RobotStatus::Online,
        endpoint: format!("http://127.0.0.1:9000/{id}"),
        protocol,
        last_heartbeat: Utc::now(),
        auth_token: None,
        metadata: serde_json::Value::Null,
    }
}

/// A canonical internal message as the validator would produce it.
pub fn test_msg(id: &str, robot: &str, priority: Priority) -> CommandMsg {
    CommandMsg {
        trace_id: "11111111-1111-4111-8111-111111111111".into(),
        timestamp: Utc::now(),
        actor: Actor::system(),
        source: Source::Api,
        id: id.into(),
        action: "robot.stop".into(),
        robot_id: robot.into(),
        params: serde_json::json!({}),
        timeout_ms: 5000,
        priority,
        labels: HashMap::new(),
        enqueued_at: Utc::now(),
        attempt_count: 0,
        max_retries: 3,
    }
}
