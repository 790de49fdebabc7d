// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared service container, constructed once at startup and handed to
//! handlers, workers, and background tasks. Tests build a fresh one per case.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::adapter::AdapterSet;
use crate::config::Config;
use crate::events::{EventBus, EventCategory, EventRecord, Severity};
use crate::metrics::Metrics;
use crate::model::Actor;
use crate::queue::CommandQueue;
use crate::registry::RobotRegistry;
use crate::store::CommandStore;
use crate::validate::ActionRegistry;

/// Capability hook consumed from the external identity system.
pub type PermissionFn = Arc<dyn Fn(&Actor, &str) -> bool + Send + Sync>;

/// Shared state for the fleetmux service.
pub struct AppState {
    pub config: Config,
    /// Bearer token cached once at startup; `None` disables auth (tests).
    pub auth_token: Option<String>,
    pub queue: Arc<CommandQueue>,
    pub store: Arc<CommandStore>,
    pub registry: Arc<RobotRegistry>,
    pub events: Arc<EventBus>,
    pub metrics: Arc<Metrics>,
    pub actions: ActionRegistry,
    pub adapters: AdapterSet,
    /// Cancellation signals for commands being dispatched, by command id.
    cancels: Mutex<HashMap<String, CancellationToken>>,
    pub shutdown: CancellationToken,
    /// Flipped once queue, registry, and workers are live.
    ready: AtomicBool,
    pub permissions: PermissionFn,
}

impl AppState {
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        let auth_token = config.app_token.clone();
        let adapters = AdapterSet::new(&config);
        Self {
            queue: Arc::new(CommandQueue::new(config.queue_max_size)),
            store: Arc::new(CommandStore::new()),
            registry: Arc::new(RobotRegistry::new()),
            events: Arc::new(EventBus::new()),
            metrics: Arc::new(Metrics::new()),
            actions: ActionRegistry::builtin(),
            adapters,
            cancels: Mutex::new(HashMap::new()),
            shutdown,
            ready: AtomicBool::new(false),
            permissions: Arc::new(|_actor, _action| true),
            auth_token,
            config,
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Publish an event on the bus and count it.
    pub fn emit(&self, record: EventRecord) {
        self.events.publish(record);
        Metrics::inc(&self.metrics.events_published);
    }

    /// Convenience for command lifecycle events.
    pub fn emit_command(
        &self,
        severity: Severity,
        trace_id: &str,
        message: &str,
        context: serde_json::Value,
    ) {
        self.emit(
            EventRecord::new(severity, EventCategory::Command, message)
                .with_trace(trace_id)
                .with_context(context),
        );
    }

    /// Cancellation token for a command's dispatch. Shared between the
    /// worker and the cancel endpoint; whoever asks first creates it.
    pub async fn dispatch_cancel_token(&self, command_id: &str) -> CancellationToken {
        self.cancels
            .lock()
            .await
            .entry(command_id.to_owned())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Cancel a command's dispatch if one is in flight. Returns whether a
    /// token existed.
    pub async fn cancel_dispatch(&self, command_id: &str) -> bool {
        match self.cancels.lock().await.get(command_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop a command's cancellation token once its attempt settles.
    pub async fn clear_cancel_token(&self, command_id: &str) {
        self.cancels.lock().await.remove(command_id);
    }

    /// Cancel every in-flight dispatch. Used when the shutdown grace period
    /// expires.
    pub async fn cancel_all_dispatches(&self) {
        for token in self.cancels.lock().await.values() {
            token.cancel();
        }
    }
}
