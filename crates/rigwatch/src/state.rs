// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The authoritative, single-writer in-memory model (spec §4.3). All
//! mutation goes through [`StateManager`]'s public operations; each
//! operation's state mutation and its bus publication are ordered so that a
//! subscriber observing the publication can read the post-mutation state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::bus::{Bus, Message};
use crate::event_buffer::{BufferedEvent, EventBuffer};
use crate::model::{
    push_history, Agent, AgentRole, AgentStats, Bead, BeadStatus, Completion, ErrorRecord,
    ErrorSeverity, HistoryEntry, Hook, LogEntry, MailEvent, Rig, RigMap, StatusChangeEvent,
};

const EVENTS_MAX: usize = 100;
const MAIL_MAX: usize = 50;
const LOGS_MAX: usize = 500;
const ERRORS_MAX: usize = 50;

/// Everything the manager holds, guarded by one lock. Operations acquire it
/// for their mutation, then release before publishing — satisfying "single
/// writer" without holding the lock across the (non-blocking) bus send.
#[derive(Default)]
struct Inner {
    rigs: RigMap<Rig>,
    agents: RigMap<Vec<Agent>>,
    beads: RigMap<Vec<Bead>>,
    hooks: RigMap<HashMap<String, Hook>>,
    mail: Vec<MailEvent>,
    logs: Vec<LogEntry>,
    errors: Vec<ErrorRecord>,
    agent_history: HashMap<String, Vec<HistoryEntry>>,
    bead_history: HashMap<String, Vec<HistoryEntry>>,
    agent_stats: HashMap<String, AgentStats>,
    previous_agent_status: HashMap<String, String>,
    previous_bead_status: HashMap<String, String>,
    task_start_times: HashMap<String, i64>,
    last_update_at: i64,
}

/// The reconstitutable subset persisted across restarts (spec §6: "Persisted
/// state layout").
#[derive(Default, Serialize, Deserialize)]
struct PersistedState {
    rigs: RigMap<Rig>,
    agents: RigMap<Vec<Agent>>,
    beads: RigMap<Vec<Bead>>,
    hooks: RigMap<HashMap<String, Hook>>,
    mail: Vec<MailEvent>,
    logs: Vec<LogEntry>,
    errors: Vec<ErrorRecord>,
    agent_history: HashMap<String, Vec<HistoryEntry>>,
    bead_history: HashMap<String, Vec<HistoryEntry>>,
    agent_stats: HashMap<String, AgentStats>,
    previous_status: HashMap<String, String>,
    previous_bead_status: HashMap<String, String>,
}

/// A point-in-time, serializable view of [`Inner`] — what `/api/state` and
/// the fan-out layer's initial `state` frame both send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub rigs: RigMap<Rig>,
    pub agents: RigMap<Vec<Agent>>,
    pub beads: RigMap<Vec<Bead>>,
    pub hooks: RigMap<HashMap<String, Hook>>,
    pub mail: Vec<MailEvent>,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<ErrorRecord>,
    pub agent_stats: HashMap<String, AgentStats>,
}

pub struct StateManager {
    inner: RwLock<Inner>,
    pub bus: Arc<Bus>,
    pub event_buffer: RwLock<EventBuffer>,
}

impl StateManager {
    pub fn new(bus: Arc<Bus>, event_buffer_max_age_ms: i64, event_buffer_max_events: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            bus,
            event_buffer: RwLock::new(EventBuffer::new(event_buffer_max_age_ms, event_buffer_max_events)),
        }
    }

    // -- rigs ---------------------------------------------------------------

    pub async fn update_rigs(&self, rigs: RigMap<Rig>, now: i64) {
        {
            let mut inner = self.inner.write().await;
            inner.rigs = rigs;
            inner.last_update_at = now;
        }
        self.publish_update(now).await;
    }

    // -- agents ---------------------------------------------------------------

    /// Replace the agent slice for `rig`; append to each changed agent's
    /// history (newest-first, capped) and publish a status-change event only
    /// for agents whose status actually differs from the stored previous
    /// value (spec §8 invariant 1: a no-op update must not append history or
    /// emit a status-change event).
    pub async fn update_agents(&self, rig: &str, agents: Vec<Agent>, now: i64) {
        let mut changes = Vec::new();
        {
            let mut inner = self.inner.write().await;
            for agent in &agents {
                let key = agent.key();
                let new_status = agent.status.as_str().to_owned();
                let changed = match inner.previous_agent_status.get(&key) {
                    Some(prev) if *prev == new_status => false,
                    _ => true,
                };
                if changed {
                    let from = inner.previous_agent_status.get(&key).cloned().unwrap_or_default();
                    push_history(
                        inner.agent_history.entry(key.clone()).or_default(),
                        HistoryEntry { from: from.clone(), to: new_status.clone(), timestamp: now },
                    );
                    inner.previous_agent_status.insert(key.clone(), new_status.clone());
                    changes.push(StatusChangeEvent { entity_key: key, from, to: new_status, timestamp: now });
                }
            }
            inner.agents.insert(rig.to_owned(), agents);
            inner.last_update_at = now;
        }
        self.publish_update(now).await;
        for change in changes {
            self.publish_event("agent_status_change", &change, now).await;
        }
    }

    // -- beads ---------------------------------------------------------------

    /// Replace the bead slice for `rig`. On a detected status change, append
    /// bead history and emit a `bead_status_change` event. When a bead
    /// transitions to `done`, attribute a completion to the agent whose hook
    /// in the same rig references it (spec §8 invariant 2 and scenario A —
    /// the rig-scoped lookup resolves the Open Question in spec §9 about
    /// cross-rig beadId collisions).
    pub async fn update_beads(&self, rig: &str, beads: Vec<Bead>, now: i64) {
        let mut changes = Vec::new();
        let mut completions: Vec<(String, Completion)> = Vec::new();
        {
            let mut inner = self.inner.write().await;
            for bead in &beads {
                let key = bead.key();
                let new_status = bead.status.as_str().to_owned();
                let prev = inner.previous_bead_status.get(&key).cloned();
                let changed = prev.as_deref() != Some(new_status.as_str());
                if !changed {
                    continue;
                }

                if bead.status == BeadStatus::InProgress {
                    inner.task_start_times.insert(key.clone(), now);
                }

                if bead.status == BeadStatus::Done {
                    if let Some(agent_key) = find_hook_owner(&inner.hooks, rig, &bead.id) {
                        let started = inner.task_start_times.remove(&key);
                        let duration = started.map(|s| now - s);
                        completions.push((
                            agent_key,
                            Completion {
                                bead_id: bead.id.clone(),
                                title: bead.title.clone(),
                                completed_at: now,
                                duration,
                            },
                        ));
                    }
                }

                let from = prev.unwrap_or_default();
                push_history(
                    inner.bead_history.entry(key.clone()).or_default(),
                    HistoryEntry { from: from.clone(), to: new_status.clone(), timestamp: now },
                );
                inner.previous_bead_status.insert(key, new_status.clone());
                changes.push(StatusChangeEvent {
                    entity_key: bead.key(),
                    from,
                    to: new_status,
                    timestamp: now,
                });
            }
            inner.beads.insert(rig.to_owned(), beads);
            inner.last_update_at = now;

            for (agent_key, completion) in &completions {
                inner.agent_stats.entry(agent_key.clone()).or_default().record(completion.clone());
            }
        }
        self.publish_update(now).await;
        for change in changes {
            self.publish_event("bead_status_change", &change, now).await;
        }
        for (agent_key, completion) in &completions {
            let payload = serde_json::json!({ "agentKey": agent_key, "completion": completion });
            self.publish_event("agent_completion", &payload, now).await;
        }
    }

    // -- hooks ---------------------------------------------------------------

    pub async fn update_hooks(&self, rig: &str, hooks: HashMap<String, Hook>, now: i64) {
        {
            let mut inner = self.inner.write().await;
            inner.hooks.insert(rig.to_owned(), hooks);
            inner.last_update_at = now;
        }
        self.publish_update(now).await;
    }

    // -- events / mail / logs / errors ---------------------------------------

    pub async fn add_event(&self, kind: &str, payload: serde_json::Value, now: i64) {
        {
            let mut buffer = self.event_buffer.write().await;
            buffer.add_event(BufferedEvent { timestamp: now, kind: kind.to_owned(), payload: payload.clone() }, now);
        }
        self.publish_bus(Message::Event {
            timestamp: self.bus.next_timestamp(),
            data: BufferedEvent { timestamp: now, kind: kind.to_owned(), payload },
        });
    }

    pub async fn add_mail(&self, mail: MailEvent, now: i64) {
        {
            let mut inner = self.inner.write().await;
            inner.mail.insert(0, mail.clone());
            inner.mail.truncate(MAIL_MAX);
        }
        let payload = serde_json::to_value(&mail).unwrap_or(serde_json::Value::Null);
        self.publish_event("mail", &payload, now).await;
    }

    pub async fn add_log(&self, log: LogEntry, now: i64) {
        {
            let mut inner = self.inner.write().await;
            inner.logs.insert(0, log.clone());
            inner.logs.truncate(LOGS_MAX);
        }
        let payload = serde_json::to_value(&log).unwrap_or(serde_json::Value::Null);
        self.publish_event("log", &payload, now).await;
    }

    /// Assigns `id = err-<ms>-<seq>` (the spec's `err-<ms>-<rand>` with a
    /// process-local monotonic sequence standing in for randomness, which is
    /// sufficient for uniqueness within one process's error list). Returns
    /// the assigned id so a caller tracking a failure streak (the poller)
    /// can fold subsequent retries into the same record via `update_error`
    /// instead of inserting one record per attempt.
    pub async fn add_error(&self, mut error: ErrorRecord, now: i64) -> String {
        error.id = format!("err-{now}-{}", self.bus.next_timestamp());
        error.timestamp = now;
        {
            let mut inner = self.inner.write().await;
            inner.errors.insert(0, error.clone());
            inner.errors.truncate(ERRORS_MAX);
        }
        self.publish_bus(Message::Error { timestamp: self.bus.next_timestamp(), data: error.clone() });
        let payload = serde_json::to_value(&error).unwrap_or(serde_json::Value::Null);
        self.publish_event("error", &payload, now).await;
        error.id
    }

    /// Updates an existing error record's severity/message/retry count in
    /// place (spec §8 scenario D: a consecutive-failure streak collapses
    /// into one record whose `retry_count` climbs to 3, not three separate
    /// records). Returns `false` if `id` no longer has a matching record
    /// (evicted by the `ERRORS_MAX` cap), letting the caller fall back to
    /// `add_error`.
    pub async fn update_error(&self, id: &str, severity: ErrorSeverity, message: String, retry_count: u32, now: i64) -> bool {
        let updated = {
            let mut inner = self.inner.write().await;
            match inner.errors.iter_mut().find(|e| e.id == id) {
                Some(record) => {
                    record.severity = severity;
                    record.message = message;
                    record.retry_count = retry_count;
                    record.timestamp = now;
                    record.clone()
                }
                None => return false,
            }
        };
        self.publish_bus(Message::Error { timestamp: self.bus.next_timestamp(), data: updated.clone() });
        let payload = serde_json::to_value(&updated).unwrap_or(serde_json::Value::Null);
        self.publish_event("error", &payload, now).await;
        true
    }

    pub async fn update_agent_stats(&self, agent_key: &str, completion: Completion) {
        let mut inner = self.inner.write().await;
        inner.agent_stats.entry(agent_key.to_owned()).or_default().record(completion);
        drop(inner);
        self.publish_update(self.bus.next_timestamp()).await;
    }

    // -- reads ---------------------------------------------------------------

    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read().await;
        StateSnapshot {
            rigs: inner.rigs.clone(),
            agents: inner.agents.clone(),
            beads: inner.beads.clone(),
            hooks: inner.hooks.clone(),
            mail: inner.mail.clone(),
            logs: inner.logs.clone(),
            errors: inner.errors.clone(),
            agent_stats: inner.agent_stats.clone(),
        }
    }

    pub async fn rig_names(&self) -> Vec<String> {
        self.inner.read().await.rigs.keys().cloned().collect()
    }

    pub async fn hooks_snapshot(&self) -> RigMap<HashMap<String, Hook>> {
        self.inner.read().await.hooks.clone()
    }

    pub async fn agent_history(&self, key: &str) -> Vec<HistoryEntry> {
        self.inner.read().await.agent_history.get(key).cloned().unwrap_or_default()
    }

    pub async fn bead_history(&self, key: &str) -> Vec<HistoryEntry> {
        self.inner.read().await.bead_history.get(key).cloned().unwrap_or_default()
    }

    pub async fn last_update_at(&self) -> i64 {
        self.inner.read().await.last_update_at
    }

    pub async fn agent_counts(&self) -> crate::health::AgentCounts {
        let inner = self.inner.read().await;
        let mut counts = crate::health::AgentCounts::default();
        for agents in inner.agents.values() {
            for agent in agents {
                counts.total += 1;
                match agent.status {
                    crate::model::AgentStatus::Running => counts.active += 1,
                    crate::model::AgentStatus::Idle => counts.idle += 1,
                    _ => {}
                }
                if agent.current_bead.is_some() {
                    counts.hooked += 1;
                }
            }
        }
        counts
    }

    // -- publication helpers --------------------------------------------------

    async fn publish_update(&self, _now: i64) {
        let snapshot = self.snapshot().await;
        let data = serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null);
        self.publish_bus(Message::State { timestamp: self.bus.next_timestamp(), data });
    }

    async fn publish_event(&self, kind: &str, payload: &impl Serialize, now: i64) {
        let payload = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        self.add_event(kind, payload, now).await;
    }

    fn publish_bus(&self, message: Message) {
        self.bus.publish(message);
    }

    // -- persistence -----------------------------------------------------------

    /// Write the reconstitutable portion of state to `path` (spec §4.3,
    /// §6 "Persisted state layout"). Called by the lifecycle controller on
    /// graceful shutdown.
    pub async fn save_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        let inner = self.inner.read().await;
        let persisted = PersistedState {
            rigs: inner.rigs.clone(),
            agents: inner.agents.clone(),
            beads: inner.beads.clone(),
            hooks: inner.hooks.clone(),
            mail: inner.mail.clone(),
            logs: inner.logs.clone(),
            errors: inner.errors.clone(),
            agent_history: inner.agent_history.clone(),
            bead_history: inner.bead_history.clone(),
            agent_stats: inner.agent_stats.clone(),
            previous_status: inner.previous_agent_status.clone(),
            previous_bead_status: inner.previous_bead_status.clone(),
        };
        drop(inner);
        let json = serde_json::to_vec_pretty(&persisted)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Restore a previously persisted snapshot, if present, so restart does
    /// not generate spurious change events for entities that didn't change.
    pub async fn restore_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let bytes = tokio::fs::read(path).await?;
        let persisted: PersistedState = serde_json::from_slice(&bytes)?;
        let mut inner = self.inner.write().await;
        inner.rigs = persisted.rigs;
        inner.agents = persisted.agents;
        inner.beads = persisted.beads;
        inner.hooks = persisted.hooks;
        inner.mail = persisted.mail;
        inner.logs = persisted.logs;
        inner.errors = persisted.errors;
        inner.agent_history = persisted.agent_history;
        inner.bead_history = persisted.bead_history;
        inner.agent_stats = persisted.agent_stats;
        inner.previous_agent_status = persisted.previous_status;
        inner.previous_bead_status = persisted.previous_bead_status;
        Ok(())
    }
}

/// Find the `"rig/agent"` key of the hook in `rig` that references `bead_id`,
/// if any. Rig-scoped per spec §9's Open Question resolution.
fn find_hook_owner(hooks: &RigMap<HashMap<String, Hook>>, rig: &str, bead_id: &str) -> Option<String> {
    let rig_hooks = hooks.get(rig)?;
    rig_hooks
        .iter()
        .find(|(_, hook)| hook.bead.as_deref() == Some(bead_id))
        .map(|(agent, _)| crate::model::agent_key(rig, agent))
}

/// Infer a role from an agent directory name (`mayor`, `witness`,
/// `refinery`, `crew/<name>`, `polecats/<name>`), used by the poller when it
/// builds [`Agent`] records (spec glossary).
pub fn infer_role(dir: &str) -> AgentRole {
    match dir {
        "mayor" => AgentRole::Mayor,
        "witness" => AgentRole::Witness,
        "refinery" => AgentRole::Refinery,
        d if d.starts_with("crew") => AgentRole::Crew,
        _ => AgentRole::Polecat,
    }
}

#[cfg(test)]
mod state_tests;
