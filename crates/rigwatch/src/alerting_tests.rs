// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;
use crate::event_buffer::BufferedEvent;

fn engine() -> Arc<AlertingEngine> {
    let bus = Arc::new(Bus::new());
    let path = std::env::temp_dir().join(format!("alerting-test-{}.json", crate::now_ms()));
    Arc::new(AlertingEngine::new(path, bus))
}

fn state() -> Arc<StateManager> {
    let bus = Arc::new(Bus::new());
    Arc::new(StateManager::new(bus, 10_800_000, 10_000))
}

fn status_change(entity_key: &str, from: &str, to: &str, timestamp: i64) -> BufferedEvent {
    let change = StatusChangeEvent { entity_key: entity_key.to_owned(), from: from.to_owned(), to: to.to_owned(), timestamp };
    BufferedEvent { timestamp, kind: "agent_status_change".to_owned(), payload: serde_json::to_value(&change).unwrap() }
}

fn agent_status_rule(cooldown_secs: u64) -> Rule {
    Rule {
        id: "r1".to_owned(),
        name: "witness goes idle".to_owned(),
        enabled: true,
        cooldown_secs,
        condition: Condition::AgentStatus { rig: "r1".to_owned(), agent: "witness".to_owned(), from: None, to: "idle".to_owned() },
        actions: vec![Action::Log { level: LogLevel::Info }],
        stats: RuleStats::default(),
    }
}

#[test]
fn wildcard_eq_matches_star_and_is_case_insensitive() {
    assert!(wildcard_eq("*", "anything"));
    assert!(wildcard_eq("Witness", "witness"));
    assert!(!wildcard_eq("witness", "mayor"));
}

#[tokio::test]
async fn agent_status_condition_matches_rig_agent_and_target_status() {
    let engine = engine();
    let rule = agent_status_rule(60);
    let st = state();

    let event = status_change("r1/witness", "running", "idle", 1_000);
    assert!(engine.leaf_matches(&rule.condition, &event, &st).await);

    let wrong_rig = status_change("r2/witness", "running", "idle", 1_000);
    assert!(!engine.leaf_matches(&rule.condition, &wrong_rig, &st).await);

    let wrong_target = status_change("r1/witness", "running", "running", 1_000);
    assert!(!engine.leaf_matches(&rule.condition, &wrong_target, &st).await);
}

#[tokio::test]
async fn event_pattern_condition_is_case_insensitive_regex_over_message() {
    let engine = engine();
    let condition = Condition::EventPattern {
        event_type: Some("log".to_owned()),
        source: Some("r1".to_owned()),
        level: Some("error".to_owned()),
        pattern: "connection (refused|reset)".to_owned(),
    };
    let matching = BufferedEvent {
        timestamp: 0,
        kind: "log".to_owned(),
        payload: serde_json::json!({"rig": "r1", "level": "error", "message": "Connection Refused by peer"}),
    };
    let st = state();
    assert!(engine.leaf_matches(&condition, &matching, &st).await);

    let wrong_level = BufferedEvent { payload: serde_json::json!({"rig": "r1", "level": "warn", "message": "connection refused"}), ..matching.clone() };
    assert!(!engine.leaf_matches(&condition, &wrong_level, &st).await);
}

#[tokio::test]
async fn composite_and_requires_every_leaf_while_or_requires_one() {
    let engine = engine();
    let st = state();
    let event = status_change("r1/witness", "running", "idle", 1_000);

    let and_condition = Condition::Composite {
        op: LogicOp::And,
        conditions: vec![
            Condition::AgentStatus { rig: "r1".to_owned(), agent: "witness".to_owned(), from: None, to: "idle".to_owned() },
            Condition::AgentStatus { rig: "r1".to_owned(), agent: "witness".to_owned(), from: None, to: "running".to_owned() },
        ],
    };
    assert!(!engine.leaf_matches(&and_condition, &event, &st).await, "second leaf targets a different `to`, AND must fail");

    let or_condition = Condition::Composite {
        op: LogicOp::Or,
        conditions: vec![
            Condition::AgentStatus { rig: "r1".to_owned(), agent: "witness".to_owned(), from: None, to: "running".to_owned() },
            Condition::AgentStatus { rig: "r1".to_owned(), agent: "witness".to_owned(), from: None, to: "idle".to_owned() },
        ],
    };
    assert!(engine.leaf_matches(&or_condition, &event, &st).await, "second leaf matches, OR must succeed");
}

#[tokio::test]
async fn cooldown_suppresses_repeat_firings_for_the_same_rule_and_entity() {
    // Spec invariant 6. `fire`'s cooldown clock is the real wall clock, so
    // this drives two calls back to back rather than faking elapsed time;
    // `evaluate_agent_status` also rejects stale events (>10s old relative
    // to the real clock), so the fixture timestamps are anchored to `now`.
    let engine = engine();
    let rule = agent_status_rule(60);
    engine.create_rule(rule.clone()).await.expect("seed rule");

    let now = crate::now_ms();
    engine.evaluate_agent_status(&status_change("r1/witness", "running", "idle", now)).await;
    engine.evaluate_agent_status(&status_change("r1/witness", "running", "idle", now)).await;

    let rules = engine.rules().await;
    let stats = &rules.iter().find(|r| r.id == "r1").unwrap().stats;
    assert_eq!(stats.trigger_count, 1, "second firing is within the 60s cooldown and must be suppressed");
}

#[tokio::test]
async fn zero_cooldown_allows_every_firing_through() {
    let engine = engine();
    let rule = agent_status_rule(0);
    engine.create_rule(rule).await.expect("seed rule");

    let now = crate::now_ms();
    engine.evaluate_agent_status(&status_change("r1/witness", "running", "idle", now)).await;
    engine.evaluate_agent_status(&status_change("r1/witness", "running", "idle", now)).await;

    let rules = engine.rules().await;
    let stats = &rules.iter().find(|r| r.id == "r1").unwrap().stats;
    assert_eq!(stats.trigger_count, 2, "a zero cooldown must not suppress the second firing");
}

#[tokio::test]
async fn error_count_condition_fires_once_the_sliding_window_reaches_the_threshold() {
    let engine = engine();
    let rule = Rule {
        id: "r2".to_owned(),
        name: "burst of errors".to_owned(),
        enabled: true,
        cooldown_secs: 60,
        condition: Condition::ErrorCount { rig: "r1".to_owned(), agent: "witness".to_owned(), window_ms: 10_000, count: 3 },
        actions: vec![],
        stats: RuleStats::default(),
    };
    engine.create_rule(rule).await.expect("seed rule");

    let error_log = |ts: i64| BufferedEvent {
        timestamp: ts,
        kind: "log".to_owned(),
        payload: serde_json::json!({"rig": "r1", "agent": "witness", "level": "error"}),
    };

    engine.evaluate_error_count(&error_log(0)).await;
    engine.evaluate_error_count(&error_log(1_000)).await;
    let rules = engine.rules().await;
    assert_eq!(rules.iter().find(|r| r.id == "r2").unwrap().stats.trigger_count, 0, "only two errors so far");

    engine.evaluate_error_count(&error_log(2_000)).await;
    let rules = engine.rules().await;
    assert_eq!(rules.iter().find(|r| r.id == "r2").unwrap().stats.trigger_count, 1, "third error within the window fires");
}

#[tokio::test]
async fn metric_threshold_condition_reads_a_dotted_path() {
    let engine = engine();
    let rule = Rule {
        id: "r3".to_owned(),
        name: "poll errors spiking".to_owned(),
        enabled: true,
        cooldown_secs: 60,
        condition: Condition::MetricThreshold { path: "polls.errorRate".to_owned(), op: ComparisonOp::Gte, value: 0.5 },
        actions: vec![],
        stats: RuleStats::default(),
    };
    engine.create_rule(rule).await.expect("seed rule");

    engine.evaluate_metric_thresholds(&serde_json::json!({"polls": {"errorRate": 0.2}})).await;
    assert_eq!(engine.rules().await.iter().find(|r| r.id == "r3").unwrap().stats.trigger_count, 0);

    engine.evaluate_metric_thresholds(&serde_json::json!({"polls": {"errorRate": 0.75}})).await;
    assert_eq!(engine.rules().await.iter().find(|r| r.id == "r3").unwrap().stats.trigger_count, 1);
}

#[tokio::test]
async fn rule_crud_create_toggle_delete() {
    let engine = engine();
    let rule = agent_status_rule(60);
    engine.create_rule(rule.clone()).await.expect("create");
    assert_eq!(engine.rules().await.len(), 1);

    let enabled = engine.toggle_rule("r1").await.expect("toggle").expect("rule exists");
    assert!(!enabled);

    assert!(engine.delete_rule("r1").await.expect("delete"));
    assert!(engine.rules().await.is_empty());
    assert_eq!(engine.toggle_rule("r1").await.expect("toggle missing"), None);
}

#[tokio::test]
async fn load_seeds_default_rules_when_no_file_exists() {
    let engine = engine();
    engine.load().await.expect("load seeds defaults");
    let rules = engine.rules().await;
    assert_eq!(rules.len(), 2);
    assert!(rules.iter().any(|r| r.id == "default-agent-error"));
    assert!(rules.iter().any(|r| r.id == "default-high-error-rate"));
}
