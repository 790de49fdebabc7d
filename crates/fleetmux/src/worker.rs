// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch workers: dequeue, resolve the robot, call its adapter, and
//! settle the command record with retry and cancellation handling.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::adapter::{DispatchError, DispatchTarget};
use crate::error::ErrorCode;
use crate::events::Severity;
use crate::metrics::Metrics;
use crate::model::{CommandMsg, CommandState, LastError, RobotStatus};
use crate::queue::NackOutcome;
use crate::state::AppState;

/// Spawn the worker pool. Each worker is one cooperative task.
pub fn spawn_workers(state: &Arc<AppState>) -> Vec<JoinHandle<()>> {
    (0..state.config.max_workers.max(1))
        .map(|worker_id| {
            let state = Arc::clone(state);
            tokio::spawn(worker_loop(state, worker_id))
        })
        .collect()
}

async fn worker_loop(state: Arc<AppState>, worker_id: usize) {
    let poll = state.config.poll_interval();
    loop {
        if state.shutdown.is_cancelled() {
            break;
        }
        let Some(msg) = state.queue.dequeue(poll).await else {
            continue;
        };
        Metrics::inc(&state.metrics.dequeued);
        process_message(&state, msg).await;
    }
    tracing::debug!(worker_id, "worker stopped");
}

/// Outcome of one dispatch attempt.
enum Attempt {
    Success(serde_json::Value),
    Cancelled,
    Error(DispatchError),
}

/// Handle one dequeued message end to end: registry resolve, dispatch,
/// settle. The queue holds the per-robot lock until ack or nack.
pub(crate) async fn process_message(state: &Arc<AppState>, msg: CommandMsg) {
    let Some(entry) = state.registry.get(&msg.robot_id).await else {
        // Unknown robot: no retry.
        state.queue.nack(&msg.id, false).await;
        Metrics::inc(&state.metrics.nacked);
        settle_failed(
            state,
            &msg,
            LastError::new(ErrorCode::RobotNotFound, "target robot is not registered"),
        )
        .await;
        return;
    };

    if entry.status == RobotStatus::Offline {
        // Offline robots may come back: retry within the budget.
        retry_or_fail(
            state,
            &msg,
            DispatchError::new(ErrorCode::RobotOffline, "target robot is offline"),
        )
        .await;
        return;
    }

    // First attempt moves the record to running; retries find it there.
    match state.store.get(&msg.id).await {
        None => {
            // Record evicted or never stored; nothing to settle.
            state.queue.ack(&msg.id).await;
            return;
        }
        Some(record) if record.state == CommandState::Pending => {
            if state.store.update_state(&msg.id, CommandState::Running, None, None).await.is_err() {
                // Lost the race with a cancellation.
                state.queue.ack(&msg.id).await;
                return;
            }
            state.emit_command(
                Severity::Info,
                &msg.trace_id,
                "command.running",
                serde_json::json!({
                    "command_id": msg.id,
                    "robot_id": msg.robot_id,
                    "attempt": msg.attempt_count,
                }),
            );
        }
        Some(record) if record.state == CommandState::Running => {}
        Some(_) => {
            // Already terminal (cancelled while queued for retry).
            state.queue.ack(&msg.id).await;
            return;
        }
    }

    let cancel = state.dispatch_cancel_token(&msg.id).await;
    let adapter = state.adapters.for_protocol(entry.protocol);
    let target = DispatchTarget::from(&entry);
    let timeout = msg.timeout();

    Metrics::inc(&state.metrics.workers_busy);
    let attempt = tokio::select! {
        _ = cancel.cancelled() => Attempt::Cancelled,
        res = tokio::time::timeout(timeout, adapter.dispatch(&msg, &target, timeout)) => {
            match res {
                Ok(Ok(result)) => Attempt::Success(result),
                Ok(Err(err)) => Attempt::Error(err),
                Err(_) => Attempt::Error(DispatchError::new(
                    ErrorCode::Timeout,
                    "dispatch deadline expired",
                )),
            }
        }
    };
    Metrics::dec(&state.metrics.workers_busy);
    state.clear_cancel_token(&msg.id).await;

    match attempt {
        Attempt::Success(result) => {
            state.queue.ack(&msg.id).await;
            Metrics::inc(&state.metrics.acked);
            match state
                .store
                .update_state(&msg.id, CommandState::Succeeded, Some(result), None)
                .await
            {
                Ok(_) => state.emit_command(
                    Severity::Info,
                    &msg.trace_id,
                    "command.succeeded",
                    serde_json::json!({
                        "command_id": msg.id,
                        "robot_id": msg.robot_id,
                        "attempts": msg.attempt_count + 1,
                    }),
                ),
                Err(e) => tracing::error!(command_id = %msg.id, err = %e, "failed to settle success"),
            }
        }
        Attempt::Cancelled => {
            state.queue.ack(&msg.id).await;
            Metrics::inc(&state.metrics.acked);
            if state
                .store
                .update_state(&msg.id, CommandState::Cancelled, None, None)
                .await
                .is_ok()
            {
                state.emit_command(
                    Severity::Info,
                    &msg.trace_id,
                    "command.cancelled",
                    serde_json::json!({"command_id": msg.id, "robot_id": msg.robot_id}),
                );
            }
        }
        Attempt::Error(err) => {
            state.emit(
                crate::events::EventRecord::new(
                    Severity::Warn,
                    crate::events::EventCategory::Protocol,
                    "dispatch.error",
                )
                .with_trace(&msg.trace_id)
                .with_context(serde_json::json!({
                    "command_id": msg.id,
                    "robot_id": msg.robot_id,
                    "code": err.code.as_str(),
                    "attempt": msg.attempt_count,
                })),
            );
            if err.code.retriable() {
                retry_or_fail(state, &msg, err).await;
            } else {
                state.queue.nack(&msg.id, false).await;
                Metrics::inc(&state.metrics.nacked);
                settle_failed(state, &msg, LastError::new(err.code, err.message)).await;
            }
        }
    }
}

/// Nack with requeue; on exhaustion settle the terminal failure.
async fn retry_or_fail(state: &Arc<AppState>, msg: &CommandMsg, err: DispatchError) {
    Metrics::inc(&state.metrics.nacked);
    match state.queue.nack(&msg.id, true).await {
        NackOutcome::Requeued { attempt, delay } => {
            Metrics::inc(&state.metrics.retries);
            state.store.record_attempt(&msg.id, attempt).await;
            state.emit_command(
                Severity::Warn,
                &msg.trace_id,
                "command.retry",
                serde_json::json!({
                    "command_id": msg.id,
                    "robot_id": msg.robot_id,
                    "attempt": attempt,
                    "delay_ms": delay.as_millis() as u64,
                    "code": err.code.as_str(),
                }),
            );
        }
        NackOutcome::Terminal => {
            settle_failed(state, msg, LastError::new(err.code, err.message)).await;
        }
    }
}

/// Move a record to `failed`, passing through `running` when the failure
/// struck before the first dispatch so observers still see the canonical
/// transition order.
async fn settle_failed(state: &Arc<AppState>, msg: &CommandMsg, error: LastError) {
    Metrics::inc(&state.metrics.errors);

    if let Some(record) = state.store.get(&msg.id).await {
        if record.state == CommandState::Pending
            && state
                .store
                .update_state(&msg.id, CommandState::Running, None, None)
                .await
                .is_ok()
        {
            state.emit_command(
                Severity::Info,
                &msg.trace_id,
                "command.running",
                serde_json::json!({
                    "command_id": msg.id,
                    "robot_id": msg.robot_id,
                    "attempt": msg.attempt_count,
                }),
            );
        }
    }

    match state
        .store
        .update_state(&msg.id, CommandState::Failed, None, Some(error.clone()))
        .await
    {
        Ok(_) => state.emit_command(
            Severity::Error,
            &msg.trace_id,
            "command.failed",
            serde_json::json!({
                "command_id": msg.id,
                "robot_id": msg.robot_id,
                "code": error.code,
                "message": error.message,
                "attempts": msg.attempt_count + 1,
            }),
        ),
        Err(e) => {
            tracing::error!(command_id = %msg.id, err = %e, "failed to settle terminal failure");
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
