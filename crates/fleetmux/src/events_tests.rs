// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn event(category: EventCategory, trace: Option<&str>) -> EventRecord {
    let mut e = EventRecord::new(Severity::Info, category, "test");
    if let Some(t) = trace {
        e = e.with_trace(t);
    }
    e
}

#[tokio::test]
async fn subscribers_receive_from_subscription_point() -> anyhow::Result<()> {
    let bus = EventBus::new();

    // Published before subscribe: not replayed.
    bus.publish(event(EventCategory::Command, Some("t0")));

    let mut rx = bus.subscribe();
    bus.publish(event(EventCategory::Command, Some("t1")));

    let got = rx.recv().await?;
    assert_eq!(got.trace_id.as_deref(), Some("t1"));
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn publish_without_subscribers_does_not_error() {
    let bus = EventBus::new();
    assert_eq!(bus.publish(event(EventCategory::Audit, None)), 0);
}

#[test]
fn empty_filter_accepts_everything() {
    let filter = EventFilter::new("", None);
    assert!(filter.wants(&event(EventCategory::Command, Some("t1"))));
    assert!(filter.wants(&event(EventCategory::Robot, None)));
}

#[test]
fn category_filter_is_exact() {
    let filter = EventFilter::new("command,audit", None);
    assert!(filter.wants(&event(EventCategory::Command, None)));
    assert!(filter.wants(&event(EventCategory::Audit, None)));
    assert!(!filter.wants(&event(EventCategory::Robot, None)));
    assert!(!filter.wants(&event(EventCategory::Protocol, None)));
}

#[test]
fn unknown_category_tokens_are_ignored() {
    let filter = EventFilter::new("bogus, command ,", None);
    assert!(filter.wants(&event(EventCategory::Command, None)));
    assert!(!filter.wants(&event(EventCategory::Auth, None)));
}

#[test]
fn trace_filter_requires_matching_trace() {
    let filter = EventFilter::new("", Some("t42"));
    assert!(filter.wants(&event(EventCategory::Command, Some("t42"))));
    assert!(!filter.wants(&event(EventCategory::Command, Some("other"))));
    assert!(!filter.wants(&event(EventCategory::Command, None)));
}

#[test]
fn severity_serializes_uppercase() -> anyhow::Result<()> {
    let json = serde_json::to_value(event(EventCategory::Protocol, None))?;
    assert_eq!(json["severity"], "INFO");
    assert_eq!(json["category"], "protocol");
    Ok(())
}
