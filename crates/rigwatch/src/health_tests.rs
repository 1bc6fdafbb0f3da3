// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn latency_anchors_match_spec_table() {
    assert_eq!(latency_score(50), 100.0);
    assert_eq!(latency_score(250), 80.0);
    assert_eq!(latency_score(500), 50.0);
    assert_eq!(latency_score(1000), 20.0);
    assert_eq!(latency_score(2000), 0.0);
    assert_eq!(latency_score(5000), 0.0);
}

#[test]
fn latency_interpolates_between_anchors() {
    let mid = latency_score(375);
    assert!(mid > 50.0 && mid < 80.0);
}

#[test]
fn uptime_with_no_agents_is_75() {
    assert_eq!(uptime_score(AgentCounts::default()), 75.0);
}

#[test]
fn uptime_all_running_is_capped_at_100() {
    let counts = AgentCounts { total: 4, active: 4, hooked: 0, idle: 0 };
    assert_eq!(uptime_score(counts), 100.0);
}

#[test]
fn error_rate_step_mapping() {
    assert_eq!(error_rate_score(100.0), 100.0);
    assert_eq!(error_rate_score(99.95), 100.0);
    assert_eq!(error_rate_score(99.5), 95.0);
    assert_eq!(error_rate_score(98.5), 90.0);
    assert_eq!(error_rate_score(96.0), 75.0);
    assert_eq!(error_rate_score(92.0), 50.0);
    assert_eq!(error_rate_score(85.0), 25.0);
    assert_eq!(error_rate_score(40.0), 10.0);
}

#[test]
fn throughput_neutral_ratio_scores_100() {
    assert_eq!(throughput_score(10.0, Some(10.0)), 100.0);
    assert_eq!(throughput_score(12.0, Some(10.0)), 100.0);
}

#[test]
fn throughput_with_no_history_is_neutral() {
    assert_eq!(throughput_score(10.0, None), 100.0);
}

#[test]
fn throughput_extreme_ratio_scores_low() {
    assert_eq!(throughput_score(100.0, Some(10.0)), 20.0);
}

#[test]
fn compute_is_deterministic() {
    let counts = AgentCounts { total: 3, active: 2, hooked: 1, idle: 0 };
    let a = compute(99.0, counts, 200, 5.0, Some(5.0), 1000);
    let b = compute(99.0, counts, 200, 5.0, Some(5.0), 1000);
    assert_eq!(a.score, b.score);
    assert_eq!(a.components.uptime, b.components.uptime);
    assert_eq!(a.status, b.status);
}

#[test]
fn status_thresholds() {
    assert_eq!(status_for(85), HealthStatus::Healthy);
    assert_eq!(status_for(60), HealthStatus::Degraded);
    assert_eq!(status_for(10), HealthStatus::Critical);
}

#[test]
fn history_is_bounded() {
    let mut history = HealthHistory::new();
    for i in 0..(DEFAULT_HISTORY_SIZE + 10) {
        history.push(HealthScore {
            score: 50,
            status: HealthStatus::Degraded,
            components: HealthComponents::default(),
            timestamp: i as i64,
        });
    }
    assert_eq!(history.entries().len(), DEFAULT_HISTORY_SIZE);
}
