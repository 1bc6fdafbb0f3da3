// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-authored alert rules evaluated against state updates, events, and
//! metrics (spec §4.5.5). Rule storage is an external JSON file, rewritten
//! on every mutation; default rules are seeded when no file exists.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, Message};
use crate::event_buffer::BufferedEvent;
use crate::model::{LogLevel, StatusChangeEvent};
use crate::state::StateManager;

const DEFAULT_COOLDOWN_SECS: u64 = 60;
const BEAD_DURATION_TICK: std::time::Duration = std::time::Duration::from_secs(5);
const STATUS_EVENT_FRESHNESS_MS: i64 = 10_000;

fn default_cooldown() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl ComparisonOp {
    fn apply(self, a: f64, b: f64) -> bool {
        match self {
            Self::Gt => a > b,
            Self::Gte => a >= b,
            Self::Lt => a < b,
            Self::Lte => a <= b,
            Self::Eq => (a - b).abs() < f64::EPSILON,
            Self::Ne => (a - b).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    AgentStatus {
        rig: String,
        agent: String,
        #[serde(default)]
        from: Option<String>,
        to: String,
    },
    BeadStatus {
        rig: String,
        #[serde(default)]
        from: Option<String>,
        to: String,
        #[serde(default)]
        priority: Option<String>,
    },
    BeadDuration {
        rig: String,
        status: String,
        duration_ms: i64,
    },
    MetricThreshold {
        path: String,
        op: ComparisonOp,
        value: f64,
    },
    EventPattern {
        #[serde(default)]
        event_type: Option<String>,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        level: Option<String>,
        pattern: String,
    },
    ErrorCount {
        rig: String,
        agent: String,
        window_ms: i64,
        count: u32,
    },
    Composite {
        op: LogicOp,
        conditions: Vec<Condition>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Log { level: LogLevel },
    Webhook { url: String, #[serde(default)] headers: HashMap<String, String> },
    Toast { #[serde(default)] message: Option<String> },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleStats {
    pub trigger_count: u64,
    pub last_triggered: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    pub condition: Condition,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub stats: RuleStats,
}

fn default_true() -> bool {
    true
}

/// Matches a wildcard pattern (`"*"` matches anything) against a concrete
/// value.
fn wildcard_eq(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern.eq_ignore_ascii_case(value)
}

fn split_entity_key(entity_key: &str) -> (&str, &str) {
    entity_key.split_once('/').unwrap_or((entity_key, ""))
}

/// A fired rule, ready for cooldown check and action dispatch.
struct Firing {
    entity_key: String,
    message: String,
    details: serde_json::Value,
}

#[derive(Default, Serialize, Deserialize)]
struct RulesFile {
    rules: Vec<Rule>,
}

pub struct AlertingEngine {
    rules_path: PathBuf,
    rules: RwLock<Vec<Rule>>,
    cooldowns: Mutex<HashMap<String, i64>>,
    bead_timers: Mutex<std::collections::HashSet<(String, String)>>,
    error_windows: Mutex<HashMap<(String, String), VecDeque<i64>>>,
    bus: Arc<Bus>,
    http: reqwest::Client,
}

impl AlertingEngine {
    pub fn new(rules_path: PathBuf, bus: Arc<Bus>) -> Self {
        Self {
            rules_path,
            rules: RwLock::new(Vec::new()),
            cooldowns: Mutex::new(HashMap::new()),
            bead_timers: Mutex::new(std::collections::HashSet::new()),
            error_windows: Mutex::new(HashMap::new()),
            bus,
            http: reqwest::Client::new(),
        }
    }

    /// Load rules from `rules_path`, seeding the defaults and writing them
    /// out if the file doesn't exist yet.
    pub async fn load(&self) -> anyhow::Result<()> {
        if self.rules_path.exists() {
            let bytes = tokio::fs::read(&self.rules_path).await?;
            let file: RulesFile = serde_json::from_slice(&bytes)?;
            *self.rules.write().await = file.rules;
        } else {
            *self.rules.write().await = default_rules();
            self.save().await?;
        }
        Ok(())
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let rules = self.rules.read().await.clone();
        let json = serde_json::to_vec_pretty(&RulesFile { rules })?;
        if let Some(parent) = self.rules_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.rules_path, json).await?;
        Ok(())
    }

    pub async fn rules(&self) -> Vec<Rule> {
        self.rules.read().await.clone()
    }

    pub async fn create_rule(&self, rule: Rule) -> anyhow::Result<()> {
        self.rules.write().await.push(rule);
        self.save().await
    }

    pub async fn update_rule(&self, rule: Rule) -> anyhow::Result<bool> {
        let mut rules = self.rules.write().await;
        let Some(slot) = rules.iter_mut().find(|r| r.id == rule.id) else { return Ok(false) };
        *slot = rule;
        drop(rules);
        self.save().await?;
        Ok(true)
    }

    pub async fn delete_rule(&self, id: &str) -> anyhow::Result<bool> {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.id != id);
        let removed = rules.len() != before;
        drop(rules);
        if removed {
            self.save().await?;
        }
        Ok(removed)
    }

    pub async fn toggle_rule(&self, id: &str) -> anyhow::Result<Option<bool>> {
        let mut rules = self.rules.write().await;
        let Some(rule) = rules.iter_mut().find(|r| r.id == id) else { return Ok(None) };
        rule.enabled = !rule.enabled;
        let enabled = rule.enabled;
        drop(rules);
        self.save().await?;
        Ok(Some(enabled))
    }

    /// Subscribe to the bus and evaluate `agent_status`/`bead_status`/
    /// `metric_threshold`/`event_pattern`/`error_count` conditions as their
    /// triggering messages arrive; run the `bead_duration` sweep on its own
    /// tick since it depends on elapsed time, not an incoming message.
    pub async fn run(self: Arc<Self>, state: Arc<StateManager>, cancel: CancellationToken) {
        let mut rx = self.bus.subscribe();
        let mut ticker = tokio::time::interval(BEAD_DURATION_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.evaluate_bead_durations(&state).await;
                }
                message = rx.recv() => {
                    match message {
                        Ok(msg) => self.on_message(&msg, &state).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn on_message(&self, message: &Message, state: &StateManager) {
        match message {
            Message::Event { data, .. } => self.on_event(data, state).await,
            Message::Metrics { data, .. } => self.evaluate_metric_thresholds(data).await,
            _ => {}
        }
    }

    async fn on_event(&self, event: &BufferedEvent, state: &StateManager) {
        match event.kind.as_str() {
            "agent_status_change" => self.evaluate_agent_status(event).await,
            "bead_status_change" => self.evaluate_bead_status(event, state).await,
            "log" => self.evaluate_error_count(event).await,
            _ => {}
        }
        self.evaluate_event_pattern(event).await;
        self.evaluate_composite(event, state).await;
    }

    /// `composite` rules are evaluated against a single incoming event: every
    /// leaf condition is checked against that same event (and, for
    /// `bead_status`'s `priority` filter, the current state snapshot).
    /// `metric_threshold` and `bead_duration` leaves have no event-scoped
    /// reading and always fail closed inside a composite — they still work
    /// as top-level conditions, evaluated on their own tick/message.
    async fn evaluate_composite(&self, event: &BufferedEvent, state: &StateManager) {
        let rules = self.rules.read().await.clone();
        for rule in rules.iter().filter(|r| r.enabled) {
            let Condition::Composite { op, conditions } = &rule.condition else { continue };
            if self.composite_matches(*op, conditions, event, state).await {
                self.fire(
                    rule,
                    Firing {
                        entity_key: event.kind.clone(),
                        message: format!("composite rule \"{}\" matched on event {}", rule.name, event.kind),
                        details: event.payload.clone(),
                    },
                )
                .await;
            }
        }
    }

    async fn composite_matches(&self, op: LogicOp, conditions: &[Condition], event: &BufferedEvent, state: &StateManager) -> bool {
        let mut results = Vec::with_capacity(conditions.len());
        for condition in conditions {
            results.push(self.leaf_matches(condition, event, state).await);
        }
        match op {
            LogicOp::And => !results.is_empty() && results.iter().all(|&b| b),
            LogicOp::Or => results.iter().any(|&b| b),
        }
    }

    /// `POST /api/rules/test`: evaluate a condition against a caller-supplied
    /// sample event without touching cooldowns, stats, or actions.
    pub async fn test_condition(&self, condition: &Condition, event: &BufferedEvent, state: &StateManager) -> bool {
        self.leaf_matches(condition, event, state).await
    }

    /// Pure(ish) predicate form of the per-type evaluators above, reused so
    /// `composite` conditions can nest any of them. Boxed because `Composite`
    /// recurses into itself.
    fn leaf_matches<'a>(
        &'a self,
        condition: &'a Condition,
        event: &'a BufferedEvent,
        state: &'a StateManager,
    ) -> futures_util::future::BoxFuture<'a, bool> {
        Box::pin(async move {
            match condition {
                Condition::AgentStatus { rig: r_rig, agent: r_agent, from, to } => {
                    if event.kind != "agent_status_change" {
                        return false;
                    }
                    let Ok(change) = serde_json::from_value::<StatusChangeEvent>(event.payload.clone()) else {
                        return false;
                    };
                    let (rig, agent) = split_entity_key(&change.entity_key);
                    if !wildcard_eq(r_rig, rig) || !wildcard_eq(r_agent, agent) || !wildcard_eq(to, &change.to) {
                        return false;
                    }
                    match from {
                        Some(expected_from) => wildcard_eq(expected_from, &change.from),
                        None => true,
                    }
                }
                Condition::BeadStatus { rig: r_rig, from, to, priority } => {
                    if event.kind != "bead_status_change" {
                        return false;
                    }
                    let Ok(change) = serde_json::from_value::<StatusChangeEvent>(event.payload.clone()) else {
                        return false;
                    };
                    let (rig, bead_id) = split_entity_key(&change.entity_key);
                    if !wildcard_eq(r_rig, rig) || !wildcard_eq(to, &change.to) {
                        return false;
                    }
                    if let Some(expected_from) = from {
                        if !wildcard_eq(expected_from, &change.from) {
                            return false;
                        }
                    }
                    if let Some(expected_priority) = priority {
                        let snapshot = state.snapshot().await;
                        let bead = snapshot.beads.get(rig).and_then(|beads| beads.iter().find(|b| b.id == bead_id));
                        let Some(bead) = bead else { return false };
                        let Some(p) = bead.priority else { return false };
                        if !expected_priority.eq_ignore_ascii_case(p.as_str()) {
                            return false;
                        }
                    }
                    true
                }
                Condition::EventPattern { event_type, source, level, pattern } => {
                    if let Some(expected) = event_type {
                        if !expected.eq_ignore_ascii_case(&event.kind) {
                            return false;
                        }
                    }
                    let text = event_text(event);
                    if let Some(expected_source) = source {
                        let rig = event.payload.get("rig").and_then(|v| v.as_str()).unwrap_or("");
                        if !wildcard_eq(expected_source, rig) {
                            return false;
                        }
                    }
                    if let Some(expected_level) = level {
                        let observed = event.payload.get("level").and_then(|v| v.as_str()).unwrap_or("");
                        if !expected_level.eq_ignore_ascii_case(observed) {
                            return false;
                        }
                    }
                    let Ok(re) = Regex::new(&format!("(?i){pattern}")) else { return false };
                    re.is_match(&text)
                }
                Condition::ErrorCount { rig: r_rig, agent: r_agent, window_ms, count } => {
                    let level = event.payload.get("level").and_then(|v| v.as_str()).unwrap_or("");
                    if !level.eq_ignore_ascii_case(LogLevel::Error.as_str()) {
                        return false;
                    }
                    let rig = event.payload.get("rig").and_then(|v| v.as_str()).unwrap_or("");
                    let agent = event.payload.get("agent").and_then(|v| v.as_str()).unwrap_or("");
                    if !wildcard_eq(r_rig, rig) || !wildcard_eq(r_agent, agent) {
                        return false;
                    }
                    let now = crate::now_ms();
                    let windows = self.error_windows.lock().await;
                    let observed = windows
                        .get(&(rig.to_owned(), agent.to_owned()))
                        .map(|w| w.iter().filter(|&&t| now - t <= *window_ms).count() as u32)
                        .unwrap_or(0);
                    observed >= *count
                }
                Condition::MetricThreshold { .. } | Condition::BeadDuration { .. } => false,
                Condition::Composite { op, conditions } => {
                    let mut results = Vec::with_capacity(conditions.len());
                    for inner in conditions {
                        results.push(self.leaf_matches(inner, event, state).await);
                    }
                    match op {
                        LogicOp::And => !results.is_empty() && results.iter().all(|&b| b),
                        LogicOp::Or => results.iter().any(|&b| b),
                    }
                }
            }
        })
    }

    async fn evaluate_agent_status(&self, event: &BufferedEvent) {
        let Ok(change) = serde_json::from_value::<StatusChangeEvent>(event.payload.clone()) else { return };
        if crate::now_ms() - change.timestamp > STATUS_EVENT_FRESHNESS_MS {
            return;
        }
        let (rig, agent) = split_entity_key(&change.entity_key);
        let rules = self.rules.read().await.clone();
        for rule in rules.iter().filter(|r| r.enabled) {
            if let Condition::AgentStatus { rig: r_rig, agent: r_agent, from, to } = &rule.condition {
                if !wildcard_eq(r_rig, rig) || !wildcard_eq(r_agent, agent) || !wildcard_eq(to, &change.to) {
                    continue;
                }
                if let Some(expected_from) = from {
                    if !wildcard_eq(expected_from, &change.from) {
                        continue;
                    }
                }
                self.fire(
                    rule,
                    Firing {
                        entity_key: change.entity_key.clone(),
                        message: format!("{} transitioned {} -> {}", change.entity_key, change.from, change.to),
                        details: serde_json::to_value(&change).unwrap_or(serde_json::Value::Null),
                    },
                )
                .await;
            }
        }
    }

    async fn evaluate_bead_status(&self, event: &BufferedEvent, state: &StateManager) {
        let Ok(change) = serde_json::from_value::<StatusChangeEvent>(event.payload.clone()) else { return };
        if crate::now_ms() - change.timestamp > STATUS_EVENT_FRESHNESS_MS {
            return;
        }
        let (rig, bead_id) = split_entity_key(&change.entity_key);
        let snapshot = state.snapshot().await;
        let bead = snapshot.beads.get(rig).and_then(|beads| beads.iter().find(|b| b.id == bead_id));

        let rules = self.rules.read().await.clone();
        for rule in rules.iter().filter(|r| r.enabled) {
            if let Condition::BeadStatus { rig: r_rig, from, to, priority } = &rule.condition {
                if !wildcard_eq(r_rig, rig) || !wildcard_eq(to, &change.to) {
                    continue;
                }
                if let Some(expected_from) = from {
                    if !wildcard_eq(expected_from, &change.from) {
                        continue;
                    }
                }
                if let Some(expected_priority) = priority {
                    let Some(bead) = bead else { continue };
                    let Some(p) = bead.priority else { continue };
                    if !expected_priority.eq_ignore_ascii_case(p.as_str()) {
                        continue;
                    }
                }
                self.fire(
                    rule,
                    Firing {
                        entity_key: change.entity_key.clone(),
                        message: format!("bead {} transitioned {} -> {}", change.entity_key, change.from, change.to),
                        details: serde_json::to_value(&change).unwrap_or(serde_json::Value::Null),
                    },
                )
                .await;
            }
        }
    }

    /// Sweep every non-terminal bead against `bead_duration` rules: if a
    /// bead has held the target status at least `duration_ms`, fire once
    /// (tracked per `(rule, bead)` in `bead_timers`); clear the timer once
    /// the bead leaves that status so it can re-fire on a future re-entry.
    async fn evaluate_bead_durations(&self, state: &StateManager) {
        let now = crate::now_ms();
        let snapshot = state.snapshot().await;
        let rules = self.rules.read().await.clone();

        for rule in rules.iter().filter(|r| r.enabled) {
            let Condition::BeadDuration { rig: r_rig, status, duration_ms } = &rule.condition else { continue };
            for (rig, beads) in &snapshot.beads {
                if !wildcard_eq(r_rig, rig) {
                    continue;
                }
                for bead in beads {
                    let key = (rule.id.clone(), bead.key());
                    if !bead.status.as_str().eq_ignore_ascii_case(status) {
                        self.bead_timers.lock().await.remove(&key);
                        continue;
                    }
                    let history = state.bead_history(&bead.key()).await;
                    let Some(entered_at) = history.iter().find(|h| h.to == bead.status.as_str()).map(|h| h.timestamp)
                    else {
                        continue;
                    };
                    if now - entered_at < *duration_ms {
                        continue;
                    }
                    let mut timers = self.bead_timers.lock().await;
                    if timers.contains(&key) {
                        continue;
                    }
                    timers.insert(key);
                    drop(timers);
                    self.fire(
                        rule,
                        Firing {
                            entity_key: bead.key(),
                            message: format!("bead {} has been {} for {}ms", bead.key(), status, now - entered_at),
                            details: serde_json::json!({"bead": bead.key(), "status": status, "elapsedMs": now - entered_at}),
                        },
                    )
                    .await;
                }
            }
        }
    }

    /// Dotted-path lookup (`agentActivity.error`) into the metrics JSON
    /// payload, compared against `metric_threshold` rules.
    async fn evaluate_metric_thresholds(&self, metrics: &serde_json::Value) {
        let rules = self.rules.read().await.clone();
        for rule in rules.iter().filter(|r| r.enabled) {
            if let Condition::MetricThreshold { path, op, value } = &rule.condition {
                let Some(observed) = lookup_path(metrics, path).and_then(|v| v.as_f64()) else { continue };
                if op.apply(observed, *value) {
                    self.fire(
                        rule,
                        Firing {
                            entity_key: path.clone(),
                            message: format!("metric {path} = {observed} ({op:?} {value})"),
                            details: serde_json::json!({"path": path, "value": observed, "threshold": value}),
                        },
                    )
                    .await;
                }
            }
        }
    }

    async fn evaluate_event_pattern(&self, event: &BufferedEvent) {
        let rules = self.rules.read().await.clone();
        for rule in rules.iter().filter(|r| r.enabled) {
            if let Condition::EventPattern { event_type, source, level, pattern } = &rule.condition {
                if let Some(expected) = event_type {
                    if !expected.eq_ignore_ascii_case(&event.kind) {
                        continue;
                    }
                }
                let text = event_text(event);
                if let Some(expected_source) = source {
                    let rig = event.payload.get("rig").and_then(|v| v.as_str()).unwrap_or("");
                    if !wildcard_eq(expected_source, rig) {
                        continue;
                    }
                }
                if let Some(expected_level) = level {
                    let observed = event.payload.get("level").and_then(|v| v.as_str()).unwrap_or("");
                    if !expected_level.eq_ignore_ascii_case(observed) {
                        continue;
                    }
                }
                let Ok(re) = Regex::new(&format!("(?i){pattern}")) else { continue };
                if re.is_match(&text) {
                    self.fire(
                        rule,
                        Firing {
                            entity_key: event.kind.clone(),
                            message: format!("event {} matched pattern {pattern}", event.kind),
                            details: event.payload.clone(),
                        },
                    )
                    .await;
                }
            }
        }
    }

    /// Track sliding windows of error-level log timestamps per `(rig,
    /// agent)`, trimming entries outside the rule's own `window_ms` lazily
    /// at evaluation time.
    async fn evaluate_error_count(&self, event: &BufferedEvent) {
        let level = event.payload.get("level").and_then(|v| v.as_str()).unwrap_or("");
        if !level.eq_ignore_ascii_case(LogLevel::Error.as_str()) {
            return;
        }
        let rig = event.payload.get("rig").and_then(|v| v.as_str()).unwrap_or("").to_owned();
        let agent = event.payload.get("agent").and_then(|v| v.as_str()).unwrap_or("").to_owned();
        let now = crate::now_ms();

        {
            let mut windows = self.error_windows.lock().await;
            windows.entry((rig.clone(), agent.clone())).or_default().push_back(now);
        }

        let rules = self.rules.read().await.clone();
        for rule in rules.iter().filter(|r| r.enabled) {
            if let Condition::ErrorCount { rig: r_rig, agent: r_agent, window_ms, count } = &rule.condition {
                if !wildcard_eq(r_rig, &rig) || !wildcard_eq(r_agent, &agent) {
                    continue;
                }
                let mut windows = self.error_windows.lock().await;
                let bucket = windows.entry((rig.clone(), agent.clone())).or_default();
                while bucket.front().is_some_and(|&t| now - t > *window_ms) {
                    bucket.pop_front();
                }
                let observed = bucket.len() as u32;
                drop(windows);
                if observed >= *count {
                    self.fire(
                        rule,
                        Firing {
                            entity_key: format!("{rig}/{agent}"),
                            message: format!("{observed} errors for {rig}/{agent} within {window_ms}ms"),
                            details: serde_json::json!({"rig": rig, "agent": agent, "count": observed}),
                        },
                    )
                    .await;
                }
            }
        }
    }

    async fn fire(&self, rule: &Rule, firing: Firing) {
        let now = crate::now_ms();
        let cooldown_key = format!("{}:{}", rule.id, firing.entity_key);
        {
            let mut cooldowns = self.cooldowns.lock().await;
            if let Some(&last) = cooldowns.get(&cooldown_key) {
                if now < last + rule.cooldown_secs as i64 * 1000 {
                    return;
                }
            }
            cooldowns.insert(cooldown_key, now);
        }

        {
            let mut rules = self.rules.write().await;
            if let Some(slot) = rules.iter_mut().find(|r| r.id == rule.id) {
                slot.stats.trigger_count += 1;
                slot.stats.last_triggered = Some(now);
            }
        }
        let _ = self.save().await;

        let alert_payload = serde_json::json!({
            "ruleId": rule.id,
            "ruleName": rule.name,
            "entityKey": firing.entity_key,
            "message": firing.message,
            "details": firing.details,
            "timestamp": now,
        });
        self.bus.publish(Message::Alert { timestamp: self.bus.next_timestamp(), data: alert_payload.clone() });

        for action in &rule.actions {
            self.run_action(action, rule, &firing, now).await;
        }
    }

    async fn run_action(&self, action: &Action, rule: &Rule, firing: &Firing, now: i64) {
        match action {
            Action::Log { level } => match level {
                LogLevel::Error => tracing::error!(rule = %rule.name, "{}", firing.message),
                LogLevel::Warn => tracing::warn!(rule = %rule.name, "{}", firing.message),
                LogLevel::Debug => tracing::debug!(rule = %rule.name, "{}", firing.message),
                LogLevel::Info => tracing::info!(rule = %rule.name, "{}", firing.message),
            },
            Action::Webhook { url, headers } => {
                let body = serde_json::json!({
                    "alert": {
                        "id": format!("alert-{now}-{}", rule.id),
                        "rule": rule.name,
                        "timestamp": now,
                        "context": firing.details,
                    }
                });
                let mut request = self.http.post(url).json(&body);
                for (name, value) in headers {
                    request = request.header(name, value);
                }
                match request.send().await {
                    Ok(resp) if !resp.status().is_success() => {
                        tracing::warn!(rule = %rule.name, status = %resp.status(), "alert webhook returned non-2xx");
                    }
                    Err(e) => tracing::warn!(rule = %rule.name, err = %e, "alert webhook failed"),
                    _ => {}
                }
            }
            Action::Toast { message } => {
                let data = serde_json::json!({
                    "ruleId": rule.id,
                    "message": message.clone().unwrap_or_else(|| firing.message.clone()),
                });
                self.bus.publish(Message::AlertUpdated { timestamp: self.bus.next_timestamp(), data });
            }
        }
    }
}

fn event_text(event: &BufferedEvent) -> String {
    for field in ["message", "content", "action"] {
        if let Some(s) = event.payload.get(field).and_then(|v| v.as_str()) {
            return s.to_owned();
        }
    }
    event.payload.to_string()
}

fn lookup_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.').try_fold(value, |acc, segment| acc.get(segment))
}

fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "default-agent-error".to_owned(),
            name: "Agent entered error status".to_owned(),
            enabled: true,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            condition: Condition::AgentStatus {
                rig: "*".to_owned(),
                agent: "*".to_owned(),
                from: None,
                to: "stopped".to_owned(),
            },
            actions: vec![Action::Log { level: LogLevel::Warn }],
            stats: RuleStats::default(),
        },
        Rule {
            id: "default-high-error-rate".to_owned(),
            name: "High error count in a short window".to_owned(),
            enabled: true,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            condition: Condition::ErrorCount { rig: "*".to_owned(), agent: "*".to_owned(), window_ms: 60_000, count: 5 },
            actions: vec![Action::Log { level: LogLevel::Error }],
            stats: RuleStats::default(),
        },
    ]
}

#[cfg(test)]
mod alerting_tests;
