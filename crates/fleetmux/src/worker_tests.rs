// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker tests for the paths that need no live robot endpoint. The full
//! dispatch pipeline is covered by the integration tests.

use super::*;
use crate::model::Priority;
use crate::test_support::{test_msg, test_robot, test_state};

#[tokio::test]
async fn unknown_robot_fails_without_retry() -> anyhow::Result<()> {
    let state = test_state();
    let msg = test_msg("c1", "ghost", Priority::Normal);
    state.store.insert(msg.clone()).await?;
    state.queue.enqueue(msg.clone()).await?;

    let mut events = state.events.subscribe();
    let dequeued = state
        .queue
        .dequeue(std::time::Duration::from_millis(100))
        .await
        .ok_or_else(|| anyhow::anyhow!("queue empty"))?;
    process_message(&state, dequeued).await;

    let record = state.store.get("c1").await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(record.state, CommandState::Failed);
    let last = record.last_error.ok_or_else(|| anyhow::anyhow!("no last_error"))?;
    assert_eq!(last.code, "ERR_ROBOT_NOT_FOUND");

    // Observers still see the canonical transition order.
    let first = events.recv().await?;
    assert_eq!(first.message, "command.running");
    let second = events.recv().await?;
    assert_eq!(second.message, "command.failed");
    assert_eq!(second.context["command_id"], "c1");

    // The per-robot lock was released.
    assert_eq!(state.queue.in_flight_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn offline_robot_retries_until_exhausted() -> anyhow::Result<()> {
    let state = test_state();
    let mut robot = test_robot("r1", crate::model::Protocol::Http);
    robot.status = crate::model::RobotStatus::Offline;
    state.registry.register(robot).await;

    let mut msg = test_msg("c1", "r1", Priority::Normal);
    msg.max_retries = 1;
    state.store.insert(msg.clone()).await?;
    state.queue.enqueue(msg).await?;

    // First attempt: requeued with backoff, record still pending.
    let dequeued = state
        .queue
        .dequeue(std::time::Duration::from_millis(100))
        .await
        .ok_or_else(|| anyhow::anyhow!("queue empty"))?;
    process_message(&state, dequeued).await;

    let record = state.store.get("c1").await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(record.state, CommandState::Pending);
    assert_eq!(state.queue.size().await.total, 1);

    // Second attempt after backoff: retries exhausted, terminal failure.
    let dequeued = state
        .queue
        .dequeue(std::time::Duration::from_millis(600))
        .await
        .ok_or_else(|| anyhow::anyhow!("retry never came back"))?;
    assert_eq!(dequeued.attempt_count, 1);
    process_message(&state, dequeued).await;

    let record = state.store.get("c1").await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(record.state, CommandState::Failed);
    let last = record.last_error.ok_or_else(|| anyhow::anyhow!("no last_error"))?;
    assert_eq!(last.code, "ERR_ROBOT_OFFLINE");
    Ok(())
}

#[tokio::test]
async fn cancelled_record_is_not_dispatched() -> anyhow::Result<()> {
    let state = test_state();
    state.registry.register(test_robot("r1", crate::model::Protocol::Http)).await;

    let msg = test_msg("c1", "r1", Priority::Normal);
    state.store.insert(msg.clone()).await?;
    state.queue.enqueue(msg).await?;

    // Operator cancels while the message sits in the queue; the worker
    // dequeues it anyway (the race the store transition table closes).
    state.store.update_state("c1", CommandState::Cancelled, None, None).await?;

    let dequeued = state
        .queue
        .dequeue(std::time::Duration::from_millis(100))
        .await
        .ok_or_else(|| anyhow::anyhow!("queue empty"))?;
    process_message(&state, dequeued).await;

    let record = state.store.get("c1").await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(record.state, CommandState::Cancelled);
    assert!(record.result.is_none());
    assert_eq!(state.queue.in_flight_count().await, 0);
    Ok(())
}
