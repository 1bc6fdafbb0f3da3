// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn success_rate_is_100_with_no_polls() {
    let collector = MetricsCollector::new(60, 0);
    assert_eq!(collector.success_rate(), 100.0);
}

#[test]
fn success_rate_reflects_failures() {
    let mut collector = MetricsCollector::new(60, 0);
    collector.record_poll(10, true);
    collector.record_poll(10, true);
    collector.record_poll(10, false);
    collector.record_poll(10, true);
    assert_eq!(collector.success_rate(), 75.0);
}

#[test]
fn avg_poll_duration_rounds_to_integer_ms() {
    let mut collector = MetricsCollector::new(60, 0);
    collector.record_poll(100, true);
    collector.record_poll(101, true);
    collector.record_poll(100, true);
    assert_eq!(collector.avg_poll_duration(), 100);
}

#[test]
fn poll_duration_history_is_bounded() {
    let mut collector = MetricsCollector::new(3, 0);
    for i in 0..10 {
        collector.record_poll(i, true);
    }
    assert_eq!(collector.snapshot().counters.total_polls, 10);
}

#[test]
fn tick_rotates_event_volume_on_60s_boundary() {
    let mut collector = MetricsCollector::new(60, 0);
    collector.record_event();
    collector.record_event();
    collector.tick(30_000);
    assert!(collector.event_volume_history().is_empty(), "tick before interval elapses is a no-op");

    collector.tick(60_000);
    assert_eq!(collector.event_volume_history().back().copied(), Some(2));
}

#[test]
fn update_frequency_means_last_five_intervals() {
    let mut collector = MetricsCollector::new(60, 0);
    let mut now = 0;
    for count in [1, 2, 3, 4, 5, 100] {
        for _ in 0..count {
            collector.record_event();
        }
        now += 60_000;
        collector.tick(now);
    }
    // last five intervals are 2,3,4,5,100 -> mean 22.8
    assert_eq!(collector.update_frequency(), 22.8);
}

#[test]
fn ws_counters_track_connect_disconnect() {
    let mut collector = MetricsCollector::new(60, 0);
    collector.record_ws_connect();
    collector.record_ws_connect();
    collector.record_ws_disconnect();
    let snap = collector.snapshot();
    assert_eq!(snap.counters.ws_connections, 1);
    assert_eq!(snap.counters.total_ws_connections, 2);
}
