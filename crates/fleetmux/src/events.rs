// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process pub/sub for lifecycle and audit events.
//!
//! The bus is best-effort and non-durable: subscribers receive events from
//! the point of subscription onward, and a subscriber that falls behind the
//! per-subscriber buffer is disconnected rather than blocking publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Per-subscriber buffer bound. A receiver lagging past this many events is
/// dropped by its forwarder.
pub const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Command,
    Auth,
    Protocol,
    Robot,
    Audit,
}

impl EventCategory {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "command" => Some(Self::Command),
            "auth" => Some(Self::Auth),
            "protocol" => Some(Self::Protocol),
            "robot" => Some(Self::Robot),
            "audit" => Some(Self::Audit),
            _ => None,
        }
    }
}

/// One append-only event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub category: EventCategory,
    pub message: String,
    /// Nested map; includes `command_id` when the event concerns a command.
    pub context: serde_json::Value,
}

impl EventRecord {
    pub fn new(severity: Severity, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            trace_id: None,
            timestamp: Utc::now(),
            severity,
            category,
            message: message.into(),
            context: serde_json::json!({}),
        }
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// Fan-out hub for [`EventRecord`]s.
pub struct EventBus {
    tx: broadcast::Sender<EventRecord>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self { tx }
    }

    /// Publish an event. Returns the number of live subscribers.
    pub fn publish(&self, event: EventRecord) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe from this point onward. No replay.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// -- Subscription filtering ---------------------------------------------------

/// Parsed subscription preferences for an event stream connection.
///
/// Built from query parameters: `category` is a comma-separated list (empty
/// means all), `trace_id` pins the stream to one trace.
#[derive(Debug, Default)]
pub struct EventFilter {
    categories: Vec<EventCategory>,
    trace_id: Option<String>,
}

impl EventFilter {
    pub fn new(categories_csv: &str, trace_id: Option<&str>) -> Self {
        let categories = categories_csv
            .split(',')
            .filter_map(|token| EventCategory::parse(token.trim()))
            .collect();
        Self { categories, trace_id: trace_id.map(str::to_owned) }
    }

    /// Whether the filter accepts this event.
    pub fn wants(&self, event: &EventRecord) -> bool {
        if !self.categories.is_empty() && !self.categories.contains(&event.category) {
            return false;
        }
        match (&self.trace_id, &event.trace_id) {
            (Some(want), Some(got)) => want == got,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
