// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::Priority;
use crate::test_support::test_msg;

#[test]
fn wire_payload_carries_required_fields() {
    let msg = test_msg("c1", "r1", Priority::Normal);
    let payload = wire_payload(&msg);

    assert_eq!(payload["trace_id"], msg.trace_id);
    assert_eq!(payload["command"]["id"], "c1");
    assert_eq!(payload["command"]["type"], "robot.stop");
    assert!(payload["command"]["params"].is_object());
    assert!(payload["timestamp"].is_string());
}

#[test]
fn reply_with_result_unwraps_it() -> anyhow::Result<()> {
    let value = parse_reply(serde_json::json!({
        "correlation_id": "c1",
        "result": {"ok": true},
    }))
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(value, serde_json::json!({"ok": true}));
    Ok(())
}

#[test]
fn reply_without_result_passes_through() -> anyhow::Result<()> {
    let value =
        parse_reply(serde_json::json!({"ok": true})).map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(value["ok"], true);
    Ok(())
}

#[test]
fn robot_reported_error_maps_onto_taxonomy() -> anyhow::Result<()> {
    let err = parse_reply(serde_json::json!({
        "error": {"code": "ERR_ROBOT_BUSY", "message": "arm in use"},
    }))
    .err()
    .ok_or_else(|| anyhow::anyhow!("expected an error"))?;
    assert_eq!(err.code, ErrorCode::RobotBusy);
    assert_eq!(err.message, "arm in use");
    Ok(())
}

#[test]
fn unknown_robot_error_code_stays_retriable() {
    let err = parse_reply(serde_json::json!({"error": {"code": "ERR_WEIRD"}})).err();
    assert!(err.is_some_and(|e| e.code.retriable()));
}
