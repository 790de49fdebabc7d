// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol adapters: one uniform dispatch contract over HTTP, MQTT, and
//! WebSocket transports.
//!
//! Adapters are stateless across calls apart from pooled connections. Each
//! adapter honors the caller's timeout and maps transport failures into the
//! shared error taxonomy; the worker decides retries from the resulting code.

pub mod http;
pub mod mqtt;
pub mod ws;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::ErrorCode;
use crate::model::{CommandMsg, Protocol};
use crate::registry::RobotEntry;

/// Dispatch failure with a taxonomy code. The worker maps this onto the
/// record's `last_error` and the retry decision.
#[derive(Debug, Clone)]
pub struct DispatchError {
    pub code: ErrorCode,
    pub message: String,
}

impl DispatchError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Where a dispatch goes: resolved from the registry entry per attempt.
#[derive(Debug, Clone)]
pub struct DispatchTarget {
    /// URL for http/websocket, broker topic for mqtt.
    pub endpoint: String,
    pub auth_token: Option<String>,
}

impl From<&RobotEntry> for DispatchTarget {
    fn from(entry: &RobotEntry) -> Self {
        Self { endpoint: entry.endpoint.clone(), auth_token: entry.auth_token.clone() }
    }
}

/// Uniform adapter contract.
#[async_trait]
pub trait RobotAdapter: Send + Sync {
    /// Deliver one command and await the robot's reply, bounded by
    /// `timeout`. Implementations must cancel in-flight I/O on expiry.
    async fn dispatch(
        &self,
        msg: &CommandMsg,
        target: &DispatchTarget,
        timeout: Duration,
    ) -> Result<serde_json::Value, DispatchError>;
}

/// Wire payload sent to every robot, regardless of transport.
pub fn wire_payload(msg: &CommandMsg) -> serde_json::Value {
    serde_json::json!({
        "trace_id": msg.trace_id,
        "timestamp": msg.timestamp,
        "command": {
            "id": msg.id,
            "type": msg.action,
            "params": msg.params,
        },
    })
}

/// Interpret a reply document from an MQTT or WebSocket robot.
///
/// Replies either carry a `result` or an `error` object with a taxonomy
/// code. A robot-reported error with an unknown code stays retriable.
pub fn parse_reply(reply: serde_json::Value) -> Result<serde_json::Value, DispatchError> {
    if let Some(err) = reply.get("error") {
        let code = err
            .get("code")
            .and_then(|c| c.as_str())
            .map_or(ErrorCode::Protocol, ErrorCode::from_wire);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("robot reported an error")
            .to_owned();
        return Err(DispatchError::new(code, message));
    }
    Ok(reply.get("result").cloned().unwrap_or(reply))
}

/// The adapters available to the worker pool, selected per dispatch by the
/// robot's registered protocol.
pub struct AdapterSet {
    http: http::HttpAdapter,
    mqtt: mqtt::MqttAdapter,
    ws: ws::WsAdapter,
}

impl AdapterSet {
    pub fn new(config: &Config) -> Self {
        Self {
            http: http::HttpAdapter::new(),
            mqtt: mqtt::MqttAdapter::new(config.mqtt_broker.clone()),
            ws: ws::WsAdapter::new(),
        }
    }

    pub fn for_protocol(&self, protocol: Protocol) -> &dyn RobotAdapter {
        match protocol {
            Protocol::Http => &self.http,
            Protocol::Mqtt => &self.mqtt,
            Protocol::Websocket => &self.ws,
        }
    }

    /// Close pooled connections. Called once during shutdown.
    pub async fn shutdown(&self) {
        self.ws.close_all().await;
        self.mqtt.disconnect().await;
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
