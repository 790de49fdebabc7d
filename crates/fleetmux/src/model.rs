// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command envelope and lifecycle types.
//!
//! An [`Envelope`] is what a client submits; validation promotes it into a
//! [`CommandMsg`] owned by the queue, and the store tracks a [`CommandRecord`]
//! per command until TTL eviction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Priority bands, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Band index used by the queue; 0 is `low`, 3 is `urgent`.
    pub fn band(&self) -> usize {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }

    pub const ALL: [Priority; 4] = [Self::Low, Self::Normal, Self::High, Self::Urgent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// Lifecycle states of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl CommandState {
    /// Terminal records are immutable until eviction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Who issued a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Human,
    Ai,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "type")]
    pub kind: ActorType,
    #[serde(default)]
    pub id: String,
}

impl Actor {
    /// Internal actor used for commands the service issues to itself.
    pub fn system() -> Self {
        Self { kind: ActorType::System, id: "fleetmux".to_owned() }
    }
}

/// Which surface a command entered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Webui,
    Api,
    Cli,
    Scheduler,
}

/// Wire protocols a robot endpoint can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    Mqtt,
    Websocket,
}

/// Registry status of a robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotStatus {
    Online,
    Offline,
    Busy,
    Maintenance,
}

// -- Input envelope -----------------------------------------------------------

/// The JSON document a client submits to `POST /v1/command`.
///
/// `trace_id` is optional on input and generated during validation when
/// absent; `timestamp` and `command.priority` are required, parsed as
/// options only so their absence surfaces as a typed validation error
/// instead of a serde failure. The bearer token travels in the
/// `Authorization` header, not in the body.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub actor: Actor,
    pub source: Source,
    pub command: CommandSpec,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub action: String,
    pub target: Target,
    #[serde(default = "default_params")]
    pub params: serde_json::Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Target {
    pub robot_id: String,
}

fn default_params() -> serde_json::Value {
    serde_json::json!({})
}

// -- Internal message ---------------------------------------------------------

/// Canonicalized internal message promoted from an [`Envelope`].
///
/// Owned by the queue while pending, by a worker while running. Immutable
/// except for `enqueued_at` and `attempt_count`, which the queue bumps on
/// retry re-enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMsg {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub source: Source,
    pub id: String,
    pub action: String,
    pub robot_id: String,
    pub params: serde_json::Value,
    pub timeout_ms: u64,
    pub priority: Priority,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub max_retries: u32,
}

impl CommandMsg {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

// -- Lifecycle record ---------------------------------------------------------

/// Last dispatch error captured on a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub code: String,
    pub message: String,
}

impl LastError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code: code.as_str().to_owned(), message: message.into() }
    }
}

/// Store entry tracking one command from `pending` to eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    #[serde(flatten)]
    pub msg: CommandMsg,
    pub state: CommandState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommandRecord {
    pub fn new(msg: CommandMsg) -> Self {
        let now = Utc::now();
        Self {
            msg,
            state: CommandState::Pending,
            result: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
