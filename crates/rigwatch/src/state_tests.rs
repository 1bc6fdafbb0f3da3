// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use super::*;
use crate::model::{AgentStatus, BeadPriority};

fn agent(rig: &str, name: &str, status: AgentStatus) -> Agent {
    Agent {
        rig: rig.to_owned(),
        name: name.to_owned(),
        role: AgentRole::Witness,
        status,
        has_work: false,
        current_bead: None,
        session_running: false,
    }
}

fn bead(rig: &str, id: &str, status: BeadStatus) -> Bead {
    Bead {
        id: id.to_owned(),
        rig: rig.to_owned(),
        title: "do the thing".to_owned(),
        status,
        priority: Some(BeadPriority::Normal),
        labels: vec![],
        owner: None,
        assignee: None,
        bead_type: None,
        description: String::new(),
        depends_on: vec![],
        created_at: None,
        updated_at: None,
        closed_at: None,
    }
}

fn manager() -> StateManager {
    StateManager::new(Arc::new(Bus::new()), 3_600_000, 10_000)
}

#[tokio::test]
async fn repeated_identical_agent_update_appends_no_history() {
    let mgr = manager();
    mgr.update_agents("r", vec![agent("r", "a1", AgentStatus::Running)], 0).await;
    mgr.update_agents("r", vec![agent("r", "a1", AgentStatus::Running)], 1000).await;
    let history = mgr.agent_history("r/a1").await;
    assert_eq!(history.len(), 1, "second identical update must not append again");
}

#[tokio::test]
async fn agent_status_change_appends_history_and_publishes_event() {
    let mgr = manager();
    let mut rx = mgr.bus.subscribe();
    mgr.update_agents("r", vec![agent("r", "a1", AgentStatus::Idle)], 0).await;
    mgr.update_agents("r", vec![agent("r", "a1", AgentStatus::Running)], 1000).await;

    let history = mgr.agent_history("r/a1").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].to, "running");

    let mut saw_event = false;
    while let Ok(msg) = rx.try_recv() {
        if matches!(msg, Message::Event { .. }) {
            saw_event = true;
        }
    }
    assert!(saw_event, "a status change must publish an event message");
}

#[tokio::test]
async fn bead_completion_attributes_duration_to_hooked_agent() {
    // Scenario A (spec §8.A).
    let mgr = manager();
    mgr.update_beads("r", vec![bead("r", "b1", BeadStatus::InProgress)], 0).await;
    let mut hooks = HashMap::new();
    hooks.insert(
        "witness".to_owned(),
        Hook { rig: "r".into(), agent: "witness".into(), bead: Some("b1".into()), title: None, molecule: None, autonomous_mode: false, attached_at: None },
    );
    mgr.update_hooks("r", hooks, 0).await;

    mgr.update_beads("r", vec![bead("r", "b1", BeadStatus::Done)], 30_000).await;

    let snapshot = mgr.snapshot().await;
    let stats = snapshot.agent_stats.get("r/witness").expect("stats recorded");
    assert_eq!(stats.total_completed, 1);
    assert_eq!(stats.completions[0].bead_id, "b1");
    assert_eq!(stats.completions[0].duration, Some(30_000));
    assert_eq!(stats.avg_duration, Some(30_000.0));
}

#[tokio::test]
async fn structural_caps_hold_for_mail_logs_errors() {
    let mgr = manager();
    for i in 0..60 {
        mgr.add_mail(
            MailEvent { rig: "r".into(), to: "a".into(), from: "b".into(), preview: format!("msg {i}"), path: "p".into(), timestamp: i },
            i,
        )
        .await;
    }
    assert_eq!(mgr.snapshot().await.mail.len(), 50);

    for i in 0..600 {
        mgr.add_log(
            LogEntry { timestamp: i, level: crate::model::LogLevel::Info, message: "x".into(), rig: "r".into(), agent: None, log_type: "daemon".into(), source: "town.log".into() },
            i,
        )
        .await;
    }
    assert_eq!(mgr.snapshot().await.logs.len(), 500);

    for i in 0..60 {
        mgr.add_error(
            ErrorRecord { id: String::new(), severity: crate::model::ErrorSeverity::Warning, source: "poller".into(), message: "boom".into(), retry_count: 0, timestamp: i },
            i,
        )
        .await;
    }
    assert_eq!(mgr.snapshot().await.errors.len(), 50);
}

#[tokio::test]
async fn bead_done_without_matching_hook_records_no_completion() {
    let mgr = manager();
    mgr.update_beads("r", vec![bead("r", "b1", BeadStatus::Done)], 0).await;
    let snapshot = mgr.snapshot().await;
    assert!(snapshot.agent_stats.is_empty());
}

#[tokio::test]
async fn snapshot_roundtrips_through_save_and_restore() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.json");

    let mgr = manager();
    mgr.update_agents("r", vec![agent("r", "a1", AgentStatus::Running)], 0).await;
    mgr.save_snapshot(&path).await.expect("save succeeds");

    let restored = manager();
    restored.restore_snapshot(&path).await.expect("restore succeeds");
    let snapshot = restored.snapshot().await;
    assert_eq!(snapshot.agents.get("r").map(|v| v.len()), Some(1));

    // Restoring previousAgentStatus means re-applying the same status is a
    // no-op, not a spurious change, after "restart".
    restored.update_agents("r", vec![agent("r", "a1", AgentStatus::Running)], 1000).await;
    assert_eq!(restored.agent_history("r/a1").await.len(), 0);
}
