// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::Completion;

fn sample(ts: i64, duration: i64) -> RawSample {
    RawSample { timestamp: ts, poll_duration: duration, event_volume: 3, agent_activity: AgentActivity::default() }
}

#[tokio::test]
async fn record_metrics_marks_dirty_and_appends() {
    let store = HistoricalStore::new(PathBuf::from("/tmp/does-not-matter.json"));
    store.record_metrics(sample(1_000, 120)).await;
    let summary = store.get_summary(0, 2_000).await;
    assert_eq!(summary.count, 1);
    assert_eq!(summary.avg, 120.0);
}

#[tokio::test]
async fn query_range_auto_selects_minute_for_short_span() {
    let store = HistoricalStore::new(PathBuf::from("/tmp/does-not-matter.json"));
    store.record_metrics(sample(1_000, 100)).await;
    let result = store.query_range(0, 5_000, Interval::Auto).await;
    assert!(matches!(result, QuerySeries::Raw(v) if v.len() == 1));
}

#[tokio::test]
async fn query_range_auto_selects_day_for_long_span() {
    let store = HistoricalStore::new(PathBuf::from("/tmp/does-not-matter.json"));
    let result = store.query_range(0, 30 * DAY_MS, Interval::Auto).await;
    assert!(matches!(result, QuerySeries::Aggregated(_)));
}

#[tokio::test]
async fn record_agent_completion_caps_at_max_and_stays_ordered_newest_first() {
    let store = HistoricalStore::new(PathBuf::from("/tmp/does-not-matter.json"));
    for i in 0..5 {
        store
            .record_agent_completion(
                "r/a",
                Completion { bead_id: format!("b{i}"), title: "t".into(), completed_at: i as i64, duration: Some(10) },
            )
            .await;
    }
    let efficiency = store.get_agent_efficiency(Some("r/a"), 0, 10).await;
    assert_eq!(efficiency.completion_count, 5);
    assert_eq!(efficiency.recent[0].bead_id, "b4");
}

#[test]
fn iqr_anomaly_indices_flags_an_outlier() {
    let values = vec![100, 102, 98, 101, 5000, 99, 103];
    let anomalies = iqr_anomaly_indices(&values);
    assert!(anomalies.contains(&4));
}

#[test]
fn iqr_anomaly_indices_empty_for_small_series() {
    assert!(iqr_anomaly_indices(&[1, 2]).is_empty());
}

#[test]
fn resolve_auto_picks_expected_interval_per_span() {
    assert_eq!(resolve_auto(0, HOUR_MS), Interval::Minute);
    assert_eq!(resolve_auto(0, 3 * DAY_MS), Interval::Hour);
    assert_eq!(resolve_auto(0, 10 * DAY_MS), Interval::Day);
}

#[tokio::test]
async fn cleanup_promotes_raw_samples_older_than_one_hour_into_hourly() {
    let store = HistoricalStore::new(PathBuf::from("/tmp/does-not-matter.json"));
    let now = 10 * HOUR_MS;
    {
        let mut inner = store.inner.lock().await;
        inner.raw.push(sample(now - 2 * HOUR_MS, 50));
        run_cleanup(&mut inner, now);
        assert!(inner.raw.is_empty());
        assert_eq!(inner.hourly.len(), 1);
    }
}
