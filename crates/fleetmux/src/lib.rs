// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleetmux: robot command middleware.
//!
//! Accepts commands over a local HTTP API, validates them, routes them
//! through a prioritized in-memory queue to a worker pool, and dispatches
//! them to robots over HTTP, MQTT, or WebSocket. Outcomes land on the
//! lifecycle store and stream out over an in-process event bus.

pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod registry;
pub mod state;
pub mod store;
pub mod test_support;
pub mod transport;
pub mod validate;
pub mod worker;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::events::Severity;
use crate::model::CommandState;
use crate::state::AppState;
use crate::transport::build_router;

/// Run the service until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(config, shutdown.clone()));

    store::spawn_evictor(Arc::clone(&state.store), state.config.store_ttl(), shutdown.clone());
    registry::spawn_heartbeat_monitor(
        Arc::clone(&state.registry),
        Arc::clone(&state.events),
        state.config.heartbeat_timeout(),
        shutdown.clone(),
    );

    let workers = worker::spawn_workers(&state);
    state.mark_ready();

    // Ctrl-C / SIGINT from the supervisor cascades into the shutdown token.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    let local = listener.local_addr()?;

    // The supervisor greps stdout for this line as a readiness signal.
    tracing::info!(service = "fleetmux", port = local.port(), "Running on http://{local}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    drain(&state, workers).await;
    Ok(())
}

/// Shutdown sequence: stop intake, give in-flight work a grace period, then
/// force-cancel and settle every non-terminal record.
async fn drain(state: &Arc<AppState>, workers: Vec<tokio::task::JoinHandle<()>>) {
    tracing::info!(service = "fleetmux", "shutting down");
    state.queue.close().await;

    let grace = state.config.shutdown_grace();
    let mut all_workers = futures_util::future::join_all(workers);
    if tokio::time::timeout(grace, &mut all_workers).await.is_err() {
        tracing::warn!("shutdown grace expired, cancelling in-flight dispatches");
        state.cancel_all_dispatches().await;
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), all_workers).await;
    }

    // Everything still waiting or parked is now unreachable; cancel it.
    state.queue.drain().await;
    for (id, _) in state.store.non_terminal_ids().await {
        let trace = state.store.get(&id).await.map(|r| r.msg.trace_id);
        match state.store.update_state(&id, CommandState::Cancelled, None, None).await {
            Ok(record) => state.emit_command(
                Severity::Warn,
                &record.msg.trace_id,
                "command.cancelled",
                serde_json::json!({"command_id": id, "reason": "shutting_down"}),
            ),
            Err(e) => {
                tracing::error!(command_id = %id, trace_id = ?trace, err = %e, "failed to cancel during drain");
            }
        }
    }

    state.adapters.shutdown().await;
    tracing::info!(service = "fleetmux", "shutdown complete");
}
