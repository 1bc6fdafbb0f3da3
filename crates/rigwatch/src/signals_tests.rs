// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::*;
use crate::model::{AgentRole, AgentStatus};

fn agent(rig: &str, name: &str, status: AgentStatus) -> Agent {
    Agent {
        rig: rig.to_owned(),
        name: name.to_owned(),
        role: AgentRole::Polecat,
        status,
        has_work: false,
        current_bead: None,
        session_running: false,
    }
}

fn hook(rig: &str, agent: &str, bead: Option<&str>) -> Hook {
    Hook {
        rig: rig.to_owned(),
        agent: agent.to_owned(),
        bead: bead.map(str::to_owned),
        title: None,
        molecule: None,
        autonomous_mode: false,
        attached_at: None,
    }
}

fn engine() -> Arc<SignalsEngine> {
    let bus = Arc::new(Bus::new());
    let state = Arc::new(StateManager::new(Arc::clone(&bus), 10_800_000, 10_000));
    Arc::new(SignalsEngine::new(
        state,
        bus,
        Arc::new(RwLock::new(MetricsCollector::new(60, 0))),
        Arc::new(RwLock::new(HealthHistory::new())),
        Arc::new(RwLock::new(AnomalyDetector::new(300_000))),
        Arc::new(RwLock::new(ErrorPatternAnalyzer::new())),
        Arc::new(HistoricalStore::new(std::env::temp_dir().join("signals-test-history.json"))),
    ))
}

#[test]
fn agent_activity_prioritizes_error_over_active_over_hooked() {
    let mut agents: RigMap<Vec<Agent>> = HashMap::new();
    agents.insert(
        "r1".to_owned(),
        vec![
            agent("r1", "mayor", AgentStatus::Running),
            agent("r1", "witness", AgentStatus::Idle),
            agent("r1", "refinery", AgentStatus::Idle),
            agent("r1", "polecat-1", AgentStatus::Running),
        ],
    );
    let mut hooks: RigMap<HashMap<String, Hook>> = HashMap::new();
    hooks.insert(
        "r1".to_owned(),
        HashMap::from([("witness".to_owned(), hook("r1", "witness", Some("bead-1")))]),
    );
    let mut recent_errors = HashSet::new();
    recent_errors.insert(crate::model::agent_key("r1", "polecat-1"));

    let activity = compute_agent_activity(&agents, &hooks, &recent_errors);

    assert_eq!(activity.error, 1, "polecat-1 has a fresh error log, outranking its Running status");
    assert_eq!(activity.active, 1, "mayor is Running with no recent error");
    assert_eq!(activity.hooked, 1, "witness is Idle but hooked to a bead");
    assert_eq!(activity.idle, 1, "refinery is Idle with no hook");
}

#[test]
fn mean_excluding_last_needs_at_least_two_points() {
    assert_eq!(mean_excluding_last(&[]), None);
    assert_eq!(mean_excluding_last(&[5]), None);
    assert_eq!(mean_excluding_last(&[1, 2, 3]), Some(1.5));
}

#[tokio::test]
async fn status_change_events_accumulate_flap_window_per_entity() {
    let engine = engine();
    for i in 0..6 {
        let change = StatusChangeEvent {
            entity_key: "r1/mayor".to_owned(),
            from: "idle".to_owned(),
            to: "running".to_owned(),
            timestamp: i * 1000,
        };
        engine.on_status_change(&serde_json::to_value(&change).unwrap()).await;
    }
    let flaps = engine.status_flaps.lock().await;
    assert_eq!(flaps.get("r1/mayor").map(VecDeque::len), Some(6));
}

#[tokio::test]
async fn error_level_logs_are_tracked_but_warn_is_not() {
    let engine = engine();
    let error_log = LogEntry {
        timestamp: 1000,
        level: LogLevel::Error,
        message: "boom".to_owned(),
        rig: "r1".to_owned(),
        agent: Some("mayor".to_owned()),
        log_type: "agent".to_owned(),
        source: "mayor.log".to_owned(),
    };
    let warn_log = LogEntry { level: LogLevel::Warn, ..error_log.clone() };

    engine.on_log(&serde_json::to_value(&error_log).unwrap()).await;
    engine.on_log(&serde_json::to_value(&warn_log).unwrap()).await;

    let errors = engine.error_log_events.lock().await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.front().unwrap().1.as_deref(), Some("r1/mayor"));

    let patterns = engine.error_patterns.read().await.summary();
    assert_eq!(patterns.total_occurrences, 2, "both error and warn feed the pattern analyzer");
}

#[tokio::test]
async fn trim_windows_drops_entries_older_than_the_flap_and_error_windows() {
    let engine = engine();
    engine.status_flaps.lock().await.insert("r1/mayor".to_owned(), VecDeque::from([0, 1_000]));
    engine.error_log_events.lock().await.push_back((0, None));
    engine.error_log_events.lock().await.push_back((1_000, None));

    engine.trim_windows(120_000).await;

    assert!(engine.status_flaps.lock().await.get("r1/mayor").is_none(), "stale entity is pruned entirely once empty");
    assert_eq!(engine.error_log_events.lock().await.len(), 0);
}
