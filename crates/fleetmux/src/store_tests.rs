// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::Priority;
use crate::test_support::test_msg;

fn msg(id: &str) -> CommandMsg {
    let mut m = test_msg(id, "r1", Priority::Normal);
    m.trace_id = "t1".into();
    m
}

#[tokio::test]
async fn insert_rejects_duplicate_id() -> anyhow::Result<()> {
    let store = CommandStore::new();
    store.insert(msg("c1")).await?;

    let err = store.insert(msg("c1")).await.err().ok_or_else(|| anyhow::anyhow!("no error"))?;
    assert_eq!(err.code, ErrorCode::Validation);
    let details = err.details.ok_or_else(|| anyhow::anyhow!("no details"))?;
    assert_eq!(details["reason"], "duplicate_command_id");
    Ok(())
}

#[tokio::test]
async fn happy_path_transitions() -> anyhow::Result<()> {
    let store = CommandStore::new();
    store.insert(msg("c1")).await?;

    let rec = store.update_state("c1", CommandState::Running, None, None).await?;
    assert_eq!(rec.state, CommandState::Running);

    let rec = store
        .update_state("c1", CommandState::Succeeded, Some(serde_json::json!({"ok": true})), None)
        .await?;
    assert_eq!(rec.state, CommandState::Succeeded);
    assert_eq!(rec.result, Some(serde_json::json!({"ok": true})));
    Ok(())
}

#[tokio::test]
async fn terminal_records_are_immutable() -> anyhow::Result<()> {
    let store = CommandStore::new();
    store.insert(msg("c1")).await?;
    store.update_state("c1", CommandState::Running, None, None).await?;
    store.update_state("c1", CommandState::Succeeded, None, None).await?;

    for to in [CommandState::Running, CommandState::Failed, CommandState::Cancelled] {
        assert!(store.update_state("c1", to, None, None).await.is_err());
    }
    let rec = store.get("c1").await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(rec.state, CommandState::Succeeded);
    Ok(())
}

#[tokio::test]
async fn pending_to_failed_is_refused() -> anyhow::Result<()> {
    let store = CommandStore::new();
    store.insert(msg("c1")).await?;

    let err = store
        .update_state("c1", CommandState::Failed, None, None)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("no error"))?;
    assert_eq!(err.code, ErrorCode::Internal);
    Ok(())
}

#[tokio::test]
async fn pending_can_be_cancelled_directly() -> anyhow::Result<()> {
    let store = CommandStore::new();
    store.insert(msg("c1")).await?;
    let rec = store.update_state("c1", CommandState::Cancelled, None, None).await?;
    assert_eq!(rec.state, CommandState::Cancelled);
    Ok(())
}

#[tokio::test]
async fn failure_captures_last_error() -> anyhow::Result<()> {
    let store = CommandStore::new();
    store.insert(msg("c1")).await?;
    store.update_state("c1", CommandState::Running, None, None).await?;
    store
        .update_state(
            "c1",
            CommandState::Failed,
            None,
            Some(LastError::new(ErrorCode::Protocol, "connect refused")),
        )
        .await?;

    let rec = store.get("c1").await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    let err = rec.last_error.ok_or_else(|| anyhow::anyhow!("no last_error"))?;
    assert_eq!(err.code, "ERR_PROTOCOL");
    Ok(())
}

#[tokio::test]
async fn attempt_counter_mirrors_onto_live_records_only() -> anyhow::Result<()> {
    let store = CommandStore::new();
    store.insert(msg("c1")).await?;
    store.record_attempt("c1", 2).await;
    assert_eq!(store.get("c1").await.map(|r| r.msg.attempt_count), Some(2));

    // Terminal records are immutable, attempt counter included.
    store.update_state("c1", CommandState::Running, None, None).await?;
    store.update_state("c1", CommandState::Succeeded, None, None).await?;
    store.record_attempt("c1", 5).await;
    assert_eq!(store.get("c1").await.map(|r| r.msg.attempt_count), Some(2));
    Ok(())
}

#[tokio::test]
async fn find_by_trace_is_many_to_one() -> anyhow::Result<()> {
    let store = CommandStore::new();
    store.insert(msg("c1")).await?;
    store.insert(msg("c2")).await?;
    let mut other = msg("c3");
    other.trace_id = "t-other".into();
    store.insert(other).await?;

    let found = store.find_by_trace("t1").await;
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|r| r.msg.trace_id == "t1"));
    Ok(())
}

#[tokio::test]
async fn eviction_only_touches_expired_terminal_records() -> anyhow::Result<()> {
    let store = CommandStore::new();
    store.insert(msg("done")).await?;
    store.insert(msg("live")).await?;
    store.update_state("done", CommandState::Running, None, None).await?;
    store.update_state("done", CommandState::Succeeded, None, None).await?;

    // Cutoff in the future: the terminal record is expired, the pending one
    // must survive regardless.
    let evicted = store.evict_terminal_older_than(Utc::now() + chrono::Duration::hours(1)).await;
    assert_eq!(evicted, 1);
    assert!(store.get("done").await.is_none());
    assert!(store.get("live").await.is_some());

    // Cutoff in the past evicts nothing.
    let evicted = store.evict_terminal_older_than(Utc::now() - chrono::Duration::hours(1)).await;
    assert_eq!(evicted, 0);
    Ok(())
}
