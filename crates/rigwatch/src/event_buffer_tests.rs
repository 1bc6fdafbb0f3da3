// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn ev(ts: i64, kind: &str) -> BufferedEvent {
    BufferedEvent { timestamp: ts, kind: kind.to_owned(), payload: serde_json::json!({}) }
}

#[test]
fn inserts_out_of_order_events_in_sorted_position() {
    let mut buf = EventBuffer::new(3_600_000, 100);
    buf.add_event(ev(30, "event"), 1000);
    buf.add_event(ev(10, "event"), 1000);
    buf.add_event(ev(20, "event"), 1000);
    let timestamps: Vec<i64> = buf.all_events().iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, vec![10, 20, 30]);
}

#[test]
fn prunes_entries_older_than_max_age() {
    let mut buf = EventBuffer::new(1000, 100);
    buf.add_event(ev(0, "event"), 0);
    buf.add_event(ev(2000, "event"), 2000);
    assert_eq!(buf.all_events().len(), 1);
    assert_eq!(buf.all_events()[0].timestamp, 2000);
}

#[test]
fn caps_at_max_events_dropping_oldest() {
    let mut buf = EventBuffer::new(3_600_000, 3);
    for i in 0..5 {
        buf.add_event(ev(i, "event"), 10);
    }
    let timestamps: Vec<i64> = buf.all_events().iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, vec![2, 3, 4]);
}

#[test]
fn events_between_is_inclusive_range() {
    let mut buf = EventBuffer::new(3_600_000, 100);
    for i in [5, 10, 15, 20, 25] {
        buf.add_event(ev(i, "event"), 100);
    }
    let between: Vec<i64> = buf.events_between(10, 20).iter().map(|e| e.timestamp).collect();
    assert_eq!(between, vec![10, 15, 20]);
}

#[test]
fn ranges_partition_the_full_sequence() {
    let mut buf = EventBuffer::new(3_600_000, 100);
    for i in [5, 10, 15, 20, 25] {
        buf.add_event(ev(i, "event"), 100);
    }
    let first_half = buf.events_between(0, 14).len();
    let second_half = buf.events_between(15, 100).len();
    assert_eq!(first_half + second_half, buf.all_events().len());
}

#[test]
fn event_at_time_returns_most_recent_at_or_before() {
    let mut buf = EventBuffer::new(3_600_000, 100);
    buf.add_event(ev(10, "a"), 100);
    buf.add_event(ev(20, "b"), 100);
    assert_eq!(buf.event_at_time(15).unwrap().kind, "a");
    assert_eq!(buf.event_at_time(20).unwrap().kind, "b");
    assert!(buf.event_at_time(5).is_none());
}

#[test]
fn replay_applies_snapshot_then_merges_hooks_updated() {
    let mut buf = EventBuffer::new(3_600_000, 100);
    let snapshot = BufferedEvent {
        timestamp: 0,
        kind: "snapshot".to_owned(),
        payload: serde_json::json!({"hooks": {"a1": {"status": "idle"}}}),
    };
    buf.add_event(snapshot, 0);
    let update = BufferedEvent {
        timestamp: 10_000,
        kind: "hooks:updated".to_owned(),
        payload: serde_json::json!({"hooks": {"a1": {"status": "active"}}}),
    };
    buf.add_event(update, 10_000);

    let at5 = buf.state_at_time(5_000);
    assert!(at5.is_replay);
    assert_eq!(at5.data["hooks"]["a1"]["status"], "idle");

    let at15 = buf.state_at_time(15_000);
    assert!(at15.is_replay);
    assert_eq!(at15.data["hooks"]["a1"]["status"], "active");
}

#[test]
fn clear_empties_buffer() {
    let mut buf = EventBuffer::new(3_600_000, 100);
    buf.add_event(ev(1, "event"), 10);
    buf.clear();
    assert!(buf.all_events().is_empty());
}
