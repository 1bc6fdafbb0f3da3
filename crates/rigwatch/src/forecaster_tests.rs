// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use super::*;
use crate::model::{AgentStats, Bead, BeadPriority, Completion};

fn bead(rig: &str, id: &str, status: BeadStatus) -> Bead {
    Bead {
        id: id.to_owned(),
        rig: rig.to_owned(),
        title: format!("bead {id}"),
        status,
        priority: Some(BeadPriority::Normal),
        labels: Vec::new(),
        owner: None,
        assignee: None,
        bead_type: None,
        description: String::new(),
        depends_on: Vec::new(),
        created_at: None,
        updated_at: None,
        closed_at: None,
    }
}

#[tokio::test]
async fn insufficient_data_below_ten_points() {
    let bus = Arc::new(Bus::new());
    let state = Arc::new(StateManager::new(bus.clone(), 3_600_000, 1000));
    let forecaster = Forecaster::new(state, bus);

    let result = forecaster.compute(crate::now_ms(), &HashMap::new(), &HashMap::new()).await;
    assert!(matches!(result, ForecastResult::InsufficientData { points: 0, required: 10 }));
}

#[test]
fn holt_linear_tracks_a_rising_trend() {
    let values: Vec<f64> = (0..20).map(|i| i as f64 * 2.0).collect();
    let holt = holt_linear(&values, ALPHA, BETA);
    assert!(holt.trend > 0.0);
    assert!(holt.level > 0.0);
}

#[test]
fn holt_linear_flat_series_has_zero_trend_and_zero_stderr() {
    let values = vec![5.0; 15];
    let holt = holt_linear(&values, ALPHA, BETA);
    assert!((holt.trend).abs() < 1e-9);
    assert!((holt.stderr).abs() < 1e-9);
    assert!((holt.level - 5.0).abs() < 1e-9);
}

#[test]
fn forecast_horizon_flags_spikes_above_threshold() {
    let holt = HoltResult { level: 100.0, trend: 0.0, stderr: 0.0 };
    let forecast = forecast_horizon(&holt, 5, 0.5, 10.0, 1.0);
    assert_eq!(forecast.spike, Some(SpikeSeverity::High));

    let calm = forecast_horizon(&holt, 5, 0.5, 100.0, 50.0);
    assert_eq!(calm.spike, None);
}

#[test]
fn estimate_throughput_averages_active_agents_only() {
    let mut stats = HashMap::new();
    let mut a = AgentStats::default();
    a.record(Completion { bead_id: "b1".into(), title: "t".into(), completed_at: 0, duration: Some(1000) });
    stats.insert("r/a".to_owned(), a);
    stats.insert("r/idle".to_owned(), AgentStats::default());

    let rate = estimate_throughput(&stats, 0, 60.0);
    assert!(rate > 0.0);
}

#[test]
fn queue_depth_forecast_excludes_done_and_closed_beads() {
    let mut beads = HashMap::new();
    beads.insert(
        "r1".to_owned(),
        vec![
            bead("r1", "b1", BeadStatus::Open),
            bead("r1", "b2", BeadStatus::Done),
            bead("r1", "b3", BeadStatus::InProgress),
        ],
    );
    let forecast = queue_depth_forecast(&beads, 1.0);
    assert_eq!(forecast.current, 2);
}

#[test]
fn bead_etas_order_by_queue_priority_then_halve_in_progress() {
    let mut beads = HashMap::new();
    beads.insert(
        "r1".to_owned(),
        vec![bead("r1", "open-1", BeadStatus::Open), bead("r1", "wip-1", BeadStatus::InProgress)],
    );
    let etas = bead_etas(&beads, 1.0, 10_000.0);
    assert_eq!(etas[0].bead_id, "wip-1");
    assert_eq!(etas[1].bead_id, "open-1");
    assert!(etas[0].eta_ms < etas[1].eta_ms);
}

#[test]
fn confidence_score_is_high_for_fresh_consistent_data() {
    let score = confidence_score(120, Some(0), 0, 10.0, 0.0);
    assert!(score > 0.9);
}

#[test]
fn confidence_score_degrades_with_stale_samples() {
    let fresh = confidence_score(50, Some(0), 0, 10.0, 2.0);
    let stale = confidence_score(50, Some(0), 10 * 60_000, 10.0, 2.0);
    assert!(stale < fresh);
}
