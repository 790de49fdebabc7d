// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command lifecycle store: `command_id` to record, with trace lookup and
//! TTL eviction of terminal records.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{CommandError, ErrorCode};
use crate::model::{CommandMsg, CommandRecord, CommandState, LastError};

/// Interval between eviction sweeps.
const EVICT_SWEEP: std::time::Duration = std::time::Duration::from_secs(60);

/// In-process mapping from command id to lifecycle record.
///
/// Safe under concurrent reads and writes. Records are immutable once they
/// reach a terminal state; the transition table below is the only mutation
/// path.
pub struct CommandStore {
    records: RwLock<HashMap<String, CommandRecord>>,
}

/// Allowed lifecycle transitions. Everything else is an invariant violation.
fn transition_allowed(from: CommandState, to: CommandState) -> bool {
    matches!(
        (from, to),
        (CommandState::Pending, CommandState::Running)
            | (CommandState::Pending, CommandState::Cancelled)
            | (CommandState::Running, CommandState::Succeeded)
            | (CommandState::Running, CommandState::Failed)
            | (CommandState::Running, CommandState::Cancelled)
    )
}

impl CommandStore {
    pub fn new() -> Self {
        Self { records: RwLock::new(HashMap::new()) }
    }

    /// Insert a fresh `pending` record. Command ids are unique for the
    /// lifetime of the process; a collision is a validation error.
    pub async fn insert(&self, msg: CommandMsg) -> Result<(), CommandError> {
        let mut records = self.records.write().await;
        if records.contains_key(&msg.id) {
            return Err(CommandError::new(ErrorCode::Validation, "duplicate command id")
                .with_details(serde_json::json!({
                    "reason": "duplicate_command_id",
                    "command_id": msg.id,
                })));
        }
        records.insert(msg.id.clone(), CommandRecord::new(msg));
        Ok(())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.records.read().await.contains_key(id)
    }

    pub async fn get(&self, id: &str) -> Option<CommandRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Apply a state transition, capturing result or error on the record.
    ///
    /// Disallowed transitions are refused and logged at ERROR; the record is
    /// left untouched.
    pub async fn update_state(
        &self,
        id: &str,
        new_state: CommandState,
        result: Option<serde_json::Value>,
        error: Option<LastError>,
    ) -> Result<CommandRecord, CommandError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| {
            CommandError::new(ErrorCode::Internal, "unknown command id")
                .with_details(serde_json::json!({"command_id": id}))
        })?;

        if !transition_allowed(record.state, new_state) {
            tracing::error!(
                command_id = %id,
                from = record.state.as_str(),
                to = new_state.as_str(),
                "refused invalid state transition"
            );
            return Err(CommandError::new(ErrorCode::Internal, "invalid state transition")
                .with_details(serde_json::json!({
                    "command_id": id,
                    "from": record.state.as_str(),
                    "to": new_state.as_str(),
                })));
        }

        record.state = new_state;
        record.updated_at = Utc::now();
        if let Some(result) = result {
            record.result = Some(result);
        }
        if let Some(error) = error {
            record.last_error = Some(error);
        }
        Ok(record.clone())
    }

    /// Mirror the queue's attempt counter onto a non-terminal record so
    /// status reads show retry progress.
    pub async fn record_attempt(&self, id: &str, attempt_count: u32) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(id) {
            if !record.state.is_terminal() {
                record.msg.attempt_count = attempt_count;
                record.updated_at = Utc::now();
            }
        }
    }

    /// Back out a record that never made it into the queue. Only the submit
    /// path uses this, to free the command id after enqueue rejection.
    pub async fn remove(&self, id: &str) -> bool {
        self.records.write().await.remove(id).is_some()
    }

    /// All records sharing a trace id, oldest first.
    pub async fn find_by_trace(&self, trace_id: &str) -> Vec<CommandRecord> {
        let records = self.records.read().await;
        let mut found: Vec<CommandRecord> =
            records.values().filter(|r| r.msg.trace_id == trace_id).cloned().collect();
        found.sort_by_key(|r| r.created_at);
        found
    }

    /// Ids of records not yet in a terminal state. Used by shutdown to
    /// cancel leftovers.
    pub async fn non_terminal_ids(&self) -> Vec<(String, CommandState)> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| !r.state.is_terminal())
            .map(|r| (r.msg.id.clone(), r.state))
            .collect()
    }

    /// Drop terminal records last updated before `cutoff`. Returns how many
    /// were evicted.
    pub async fn evict_terminal_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !(r.state.is_terminal() && r.updated_at < cutoff));
        before - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for CommandStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the background task that evicts expired terminal records.
pub fn spawn_evictor(store: Arc<CommandStore>, ttl: std::time::Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(EVICT_SWEEP);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let cutoff = Utc::now()
                - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
            let evicted = store.evict_terminal_older_than(cutoff).await;
            if evicted > 0 {
                tracing::debug!(evicted, "evicted expired command records");
            }
        }
    });
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
