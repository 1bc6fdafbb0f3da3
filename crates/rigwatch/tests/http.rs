// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the read API and rule CRUD surface.
//!
//! Uses `axum_test::TestServer` — no real TCP needed, mirroring the
//! teacher's own `crates/mux/tests/http.rs`.

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use rigwatch::alerting::AlertingEngine;
use rigwatch::anomaly::AnomalyDetector;
use rigwatch::app::AppState;
use rigwatch::bus::Bus;
use rigwatch::config::Config;
use rigwatch::error_patterns::ErrorPatternAnalyzer;
use rigwatch::forecaster::Forecaster;
use rigwatch::health::HealthHistory;
use rigwatch::historical::HistoricalStore;
use rigwatch::http::build_router;
use rigwatch::metrics::MetricsCollector;
use rigwatch::model::{Agent, AgentRole, AgentStatus, Rig, RigStatus};
use rigwatch::state::StateManager;

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        gt_dir: Some(dir.path().to_path_buf()),
        port: 0,
        host: "127.0.0.1".into(),
        poll_interval_ms: 5_000,
        metrics_broadcast_interval_ms: 5_000,
        log_level: "info".into(),
        alert_cooldown_ms: 300_000,
        event_buffer_max_age_ms: 10_800_000,
        event_buffer_max_events: 10_000,
        state_snapshot_path: dir.path().join("state.json"),
        historical_store_path: dir.path().join("history.json"),
        rules_path: dir.path().join("rules.json"),
        command: None,
    }
}

async fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
    let config = test_config(dir);
    let bus = Arc::new(Bus::new());
    let state = Arc::new(StateManager::new(Arc::clone(&bus), config.event_buffer_max_age_ms as i64, config.event_buffer_max_events));
    let metrics = Arc::new(RwLock::new(MetricsCollector::new(60, rigwatch::now_ms())));
    let health_history = Arc::new(RwLock::new(HealthHistory::new()));
    let anomaly = Arc::new(RwLock::new(AnomalyDetector::new(config.alert_cooldown_ms as i64)));
    let error_patterns = Arc::new(RwLock::new(ErrorPatternAnalyzer::new()));
    let historical = Arc::new(HistoricalStore::new(config.historical_store_path.clone()));
    let forecaster = Arc::new(Forecaster::new(Arc::clone(&state), Arc::clone(&bus)));
    let alerting = Arc::new(AlertingEngine::new(config.rules_path.clone(), Arc::clone(&bus)));
    alerting.load().await.expect("seed default rules");

    Arc::new(AppState {
        config,
        bus,
        state,
        metrics,
        health_history,
        anomaly,
        error_patterns,
        historical,
        forecaster,
        alerting,
        shutdown: CancellationToken::new(),
    })
}

fn test_server(app: Arc<AppState>) -> TestServer {
    TestServer::new(build_router(app)).expect("failed to create test server")
}

#[tokio::test]
async fn get_state_reflects_updates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = test_state(&dir).await;

    let mut rigs = std::collections::HashMap::new();
    rigs.insert(
        "r1".to_owned(),
        Rig { name: "r1".into(), polecats: 2, crew: 1, agents: vec!["witness".into()], status: RigStatus::Active },
    );
    app.state.update_rigs(rigs, rigwatch::now_ms()).await;
    app.state
        .update_agents(
            "r1",
            vec![Agent {
                rig: "r1".into(),
                name: "witness".into(),
                role: AgentRole::Witness,
                status: AgentStatus::Running,
                has_work: false,
                current_bead: None,
                session_running: true,
            }],
            rigwatch::now_ms(),
        )
        .await;

    let server = test_server(Arc::clone(&app));
    let response = server.get("/api/state").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["rigs"]["r1"]["polecats"], 2);
    assert_eq!(body["agents"]["r1"][0]["status"], "running");
}

#[tokio::test]
async fn get_rigs_lists_names() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = test_state(&dir).await;
    let mut rigs = std::collections::HashMap::new();
    rigs.insert("alpha".to_owned(), Rig { name: "alpha".into(), polecats: 0, crew: 0, agents: vec![], status: RigStatus::Idle });
    app.state.update_rigs(rigs, rigwatch::now_ms()).await;

    let server = test_server(app);
    let response = server.get("/api/rigs").await;
    response.assert_status_ok();
    let names: Vec<String> = response.json();
    assert_eq!(names, vec!["alpha".to_owned()]);
}

#[tokio::test]
async fn alerts_endpoint_starts_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = test_state(&dir).await;
    let server = test_server(app);
    let response = server.get("/api/alerts").await;
    response.assert_status_ok();
    let alerts: Vec<serde_json::Value> = response.json();
    assert!(alerts.is_empty());
}

#[tokio::test]
async fn rule_crud_round_trips_through_the_api() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = test_state(&dir).await;
    let server = test_server(app);

    let baseline = server.get("/api/rules").await.json::<Vec<serde_json::Value>>().len();

    let create = server
        .post("/api/rules")
        .json(&json!({
            "name": "agent goes idle",
            "condition": {"type": "agent_status", "rig": "*", "agent": "*", "to": "idle"},
            "actions": [{"type": "log", "level": "info"}],
        }))
        .await;
    create.assert_status_ok();
    let rule: serde_json::Value = create.json();
    let id = rule["id"].as_str().expect("rule id").to_owned();

    let list = server.get("/api/rules").await;
    let rules: Vec<serde_json::Value> = list.json();
    assert_eq!(rules.len(), baseline + 1);

    let toggled = server.post(&format!("/api/rules/{id}/toggle")).await;
    toggled.assert_status_ok();
    assert_eq!(toggled.json::<serde_json::Value>()["enabled"], false);

    let deleted = server.delete(&format!("/api/rules/{id}")).await;
    deleted.assert_status_ok();

    let list_after = server.get("/api/rules").await;
    let rules_after: Vec<serde_json::Value> = list_after.json();
    assert_eq!(rules_after.len(), baseline);
}

#[tokio::test]
async fn export_events_csv_escapes_and_filters() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = test_state(&dir).await;
    app.state
        .add_event("feed", json!({"rig": "r1", "message": "contains, a comma"}), rigwatch::now_ms())
        .await;

    let server = test_server(app);
    let response = server.get("/api/events/export?format=csv").await;
    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("\"contains, a comma\""));
}
