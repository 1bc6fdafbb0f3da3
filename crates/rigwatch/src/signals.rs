// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Derives metrics, health, anomaly, and error-pattern signals from bus
//! traffic and a periodic tick (spec §4.5's glue). Everything here reads
//! from the bus or `StateManager` and writes into the collectors the HTTP
//! and fan-out layers read from — no collector drives itself end to end.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::anomaly::{AnomalyDetector, AnomalyInputs};
use crate::bus::{Bus, Message};
use crate::error_patterns::ErrorPatternAnalyzer;
use crate::health::{self, HealthHistory};
use crate::historical::{HistoricalStore, RawSample};
use crate::metrics::{AgentActivity, MetricsCollector, MetricsSnapshot};
use crate::model::{Agent, Completion, Hook, LogEntry, LogLevel, RigMap, StatusChangeEvent};
use crate::state::StateManager;

const FLAP_WINDOW_MS: i64 = 60_000;
const ERROR_WINDOW_MS: i64 = 60_000;
const RAW_SAMPLE_INTERVAL_MS: i64 = 60_000;

/// Drives [`MetricsCollector`], [`AnomalyDetector`], [`ErrorPatternAnalyzer`],
/// the health calculator, and the historical store's raw-sample recording.
pub struct SignalsEngine {
    state: Arc<StateManager>,
    bus: Arc<Bus>,
    metrics: Arc<RwLock<MetricsCollector>>,
    health_history: Arc<RwLock<HealthHistory>>,
    anomaly: Arc<RwLock<AnomalyDetector>>,
    error_patterns: Arc<RwLock<ErrorPatternAnalyzer>>,
    historical: Arc<HistoricalStore>,
    status_flaps: Mutex<HashMap<String, VecDeque<i64>>>,
    error_log_events: Mutex<VecDeque<(i64, Option<String>)>>,
    last_raw_sample_at: Mutex<i64>,
}

impl SignalsEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<StateManager>,
        bus: Arc<Bus>,
        metrics: Arc<RwLock<MetricsCollector>>,
        health_history: Arc<RwLock<HealthHistory>>,
        anomaly: Arc<RwLock<AnomalyDetector>>,
        error_patterns: Arc<RwLock<ErrorPatternAnalyzer>>,
        historical: Arc<HistoricalStore>,
    ) -> Self {
        Self {
            state,
            bus,
            metrics,
            health_history,
            anomaly,
            error_patterns,
            historical,
            status_flaps: Mutex::new(HashMap::new()),
            error_log_events: Mutex::new(VecDeque::new()),
            last_raw_sample_at: Mutex::new(0),
        }
    }

    /// Subscribe to the bus and drive the periodic tick until `cancel` fires.
    pub async fn run(self: Arc<Self>, tick_interval: Duration, cancel: CancellationToken) {
        let mut rx = self.bus.subscribe();
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
                message = rx.recv() => {
                    match message {
                        Ok(msg) => self.on_message(&msg).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn on_message(&self, message: &Message) {
        let Message::Event { data, .. } = message else { return };
        match data.kind.as_str() {
            "agent_status_change" | "bead_status_change" => self.on_status_change(&data.payload).await,
            "log" => self.on_log(&data.payload).await,
            "agent_completion" => self.on_completion(&data.payload).await,
            _ => {}
        }
        self.metrics.write().await.record_event();
    }

    async fn on_status_change(&self, payload: &serde_json::Value) {
        let Ok(change) = serde_json::from_value::<StatusChangeEvent>(payload.clone()) else { return };
        let mut flaps = self.status_flaps.lock().await;
        let entry = flaps.entry(change.entity_key).or_default();
        entry.push_back(change.timestamp);
        while entry.front().is_some_and(|&t| change.timestamp - t > FLAP_WINDOW_MS) {
            entry.pop_front();
        }
    }

    async fn on_log(&self, payload: &serde_json::Value) {
        let Ok(entry) = serde_json::from_value::<LogEntry>(payload.clone()) else { return };
        if matches!(entry.level, LogLevel::Error | LogLevel::Warn) {
            self.error_patterns.write().await.observe(&entry, entry.timestamp);
        }
        if entry.level == LogLevel::Error {
            let agent_key = entry.agent.as_ref().map(|a| crate::model::agent_key(&entry.rig, a));
            self.error_log_events.lock().await.push_back((entry.timestamp, agent_key));
        }
    }

    async fn on_completion(&self, payload: &serde_json::Value) {
        let Some(agent_key) = payload.get("agentKey").and_then(|v| v.as_str()) else { return };
        let Some(raw) = payload.get("completion").cloned() else { return };
        let Ok(completion) = serde_json::from_value::<Completion>(raw) else { return };
        self.historical.record_agent_completion(agent_key, completion).await;
    }

    async fn tick(&self) {
        let now = crate::now_ms();
        self.trim_windows(now).await;

        let snapshot = self.state.snapshot().await;
        let recent_error_agents: HashSet<String> =
            self.error_log_events.lock().await.iter().filter_map(|(_, agent)| agent.clone()).collect();
        let activity = compute_agent_activity(&snapshot.agents, &snapshot.hooks, &recent_error_agents);

        let mut metrics = self.metrics.write().await;
        metrics.set_agent_activity(activity);
        metrics.tick(now);
        let ms_snapshot = metrics.snapshot();
        let event_volume_history: Vec<u64> = metrics.event_volume_history().iter().copied().collect();
        drop(metrics);

        let agent_counts = self.state.agent_counts().await;
        let historical_mean = mean_excluding_last(&event_volume_history);
        let health_score = health::compute(
            ms_snapshot.success_rate,
            agent_counts,
            ms_snapshot.avg_poll_duration,
            ms_snapshot.update_frequency,
            historical_mean,
            now,
        );
        self.health_history.write().await.push(health_score.clone());

        let status_flap_counts: HashMap<String, usize> = {
            let flaps = self.status_flaps.lock().await;
            flaps.iter().map(|(k, v)| (k.clone(), v.len())).collect()
        };
        let recent_error_log_count_1m = self.error_log_events.lock().await.len() as u64;

        let inputs = AnomalyInputs {
            avg_poll_duration_ms: ms_snapshot.avg_poll_duration,
            success_rate: ms_snapshot.success_rate,
            total_polls: ms_snapshot.counters.total_polls,
            agent_activity_error: ms_snapshot.agent_activity.error,
            error_agent_keys: recent_error_agents.into_iter().collect(),
            recent_error_log_count_1m,
            last_update_age_ms: now - self.state.last_update_at().await,
            status_flap_counts,
        };

        let before_ids: HashSet<String> =
            self.anomaly.read().await.active_alerts().iter().map(|a| a.id.clone()).collect();
        self.anomaly.write().await.evaluate(&inputs, now);
        let after = self.anomaly.read().await.active_alerts().to_vec();
        for alert in after.iter().filter(|a| !before_ids.contains(&a.id)) {
            let payload = serde_json::to_value(alert).unwrap_or(serde_json::Value::Null);
            self.bus.publish(Message::Alert { timestamp: self.bus.next_timestamp(), data: payload });
        }

        let error_summary = self.error_patterns.read().await.summary();
        let error_payload = serde_json::to_value(&error_summary).unwrap_or(serde_json::Value::Null);
        self.bus.publish(Message::ErrorPatterns { timestamp: self.bus.next_timestamp(), data: error_payload });

        let metrics_payload = serde_json::json!({
            "counters": ms_snapshot.counters,
            "agentActivity": ms_snapshot.agent_activity,
            "avgPollDuration": ms_snapshot.avg_poll_duration,
            "updateFrequency": ms_snapshot.update_frequency,
            "successRate": ms_snapshot.success_rate,
            "health": health_score,
        });
        self.bus.publish(Message::Metrics { timestamp: self.bus.next_timestamp(), data: metrics_payload });

        self.maybe_record_raw_sample(now, &ms_snapshot, &event_volume_history).await;
    }

    async fn trim_windows(&self, now: i64) {
        let mut flaps = self.status_flaps.lock().await;
        for timestamps in flaps.values_mut() {
            while timestamps.front().is_some_and(|&t| now - t > FLAP_WINDOW_MS) {
                timestamps.pop_front();
            }
        }
        flaps.retain(|_, v| !v.is_empty());
        drop(flaps);

        let mut errors = self.error_log_events.lock().await;
        while errors.front().is_some_and(|&(t, _)| now - t > ERROR_WINDOW_MS) {
            errors.pop_front();
        }
    }

    async fn maybe_record_raw_sample(&self, now: i64, snapshot: &MetricsSnapshot, event_volume_history: &[u64]) {
        let mut last = self.last_raw_sample_at.lock().await;
        if now - *last < RAW_SAMPLE_INTERVAL_MS {
            return;
        }
        *last = now;
        drop(last);
        let event_volume = event_volume_history.last().copied().unwrap_or(0);
        self.historical
            .record_metrics(RawSample {
                timestamp: now,
                poll_duration: snapshot.avg_poll_duration,
                event_volume,
                agent_activity: snapshot.agent_activity,
            })
            .await;
    }
}

/// Partition agents into mutually-exclusive activity buckets, priority
/// `error > active > hooked > idle`.
///
/// [`Hook`] carries no status field — the association it records is purely
/// the bead attachment — so `error` is derived instead from agents with a
/// fresh error-level log line in the trailing minute, the closest available
/// stand-in for "this agent's hook reports an error status", and `hooked`
/// from the presence of a hook entry that references a bead.
fn compute_agent_activity(
    agents: &RigMap<Vec<Agent>>,
    hooks: &RigMap<HashMap<String, Hook>>,
    recent_error_agents: &HashSet<String>,
) -> AgentActivity {
    let mut activity = AgentActivity::default();
    for (rig, rig_agents) in agents {
        for agent in rig_agents {
            let key = agent.key();
            let hooked = hooks.get(rig).and_then(|m| m.get(&agent.name)).is_some_and(|h| h.bead.is_some());
            if recent_error_agents.contains(&key) {
                activity.error += 1;
            } else if agent.status == crate::model::AgentStatus::Running {
                activity.active += 1;
            } else if hooked {
                activity.hooked += 1;
            } else {
                activity.idle += 1;
            }
        }
    }
    activity
}

fn mean_excluding_last(history: &[u64]) -> Option<f64> {
    if history.len() < 2 {
        return None;
    }
    let prior = &history[..history.len() - 1];
    Some(prior.iter().sum::<u64>() as f64 / prior.len() as f64)
}

#[cfg(test)]
mod signals_tests;
