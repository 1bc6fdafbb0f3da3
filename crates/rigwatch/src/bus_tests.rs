// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn timestamps_are_monotonic_even_with_rapid_calls() {
    let bus = Bus::new();
    let mut last = 0;
    for _ in 0..50 {
        let ts = bus.next_timestamp();
        assert!(ts > last);
        last = ts;
    }
}

#[tokio::test]
async fn subscribers_receive_published_messages_in_order() {
    let bus = Bus::new();
    let mut rx = bus.subscribe();

    bus.publish(Message::State { timestamp: bus.next_timestamp(), data: serde_json::json!({"a": 1}) });
    bus.publish(Message::Shutdown { timestamp: bus.next_timestamp() });

    let first = rx.recv().await.unwrap();
    assert!(matches!(first, Message::State { .. }));
    let second = rx.recv().await.unwrap();
    assert!(matches!(second, Message::Shutdown { .. }));
}

#[tokio::test]
async fn multiple_subscribers_each_get_every_message() {
    let bus = Bus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    bus.publish(Message::Error {
        timestamp: bus.next_timestamp(),
        data: ErrorRecord {
            id: "err-1".into(),
            severity: crate::model::ErrorSeverity::Warning,
            source: "poller".into(),
            message: "boom".into(),
            retry_count: 1,
            timestamp: 0,
        },
    });

    assert!(matches!(a.recv().await.unwrap(), Message::Error { .. }));
    assert!(matches!(b.recv().await.unwrap(), Message::Error { .. }));
}

#[test]
fn publish_with_no_subscribers_does_not_panic() {
    let bus = Bus::new();
    bus.publish(Message::Shutdown { timestamp: bus.next_timestamp() });
}

#[test]
fn topic_mapping_matches_wire_type_grouping() {
    let ts = 1;
    assert_eq!(Message::State { timestamp: ts, data: serde_json::json!(null) }.topic(), Topic::Update);
    assert_eq!(Message::Alert { timestamp: ts, data: serde_json::json!(null) }.topic(), Topic::Alert);
    assert_eq!(
        Message::AlertDismissed { timestamp: ts, data: serde_json::json!(null) }.topic(),
        Topic::Alert
    );
}
