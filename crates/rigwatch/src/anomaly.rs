// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Threshold-based anomaly detection and the alert state machine (spec
//! §4.5.3). Evaluated on each metrics update and on a 5s tick.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const DEFAULT_MAX_ALERTS: usize = 100;
const MAX_ALERT_HISTORY: usize = 500;
const FLAPPING_WINDOW_MS: i64 = 60_000;
const FLAPPING_THRESHOLD: usize = 5;
const STALE_DATA_MS: i64 = 30_000;

/// Runtime-adjustable threshold set backing [`AnomalyDetector::evaluate`],
/// exposed read/write via the read API's `/api/alerts/thresholds` endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    pub slow_response_warning_ms: i64,
    pub slow_response_critical_ms: i64,
    pub low_success_rate_warning_pct: f64,
    pub low_success_rate_critical_pct: f64,
    pub high_error_rate_warning_count: u64,
    pub high_error_rate_critical_count: u64,
    pub stale_data_ms: i64,
    pub flapping_threshold: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            slow_response_warning_ms: 2000,
            slow_response_critical_ms: 5000,
            low_success_rate_warning_pct: 90.0,
            low_success_rate_critical_pct: 70.0,
            high_error_rate_warning_count: 5,
            high_error_rate_critical_count: 15,
            stale_data_ms: STALE_DATA_MS,
            flapping_threshold: FLAPPING_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    SlowResponse,
    LowSuccessRate,
    AgentError,
    AgentStatusFlapping,
    HighErrorRate,
    StaleData,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlowResponse => "SLOW_RESPONSE",
            Self::LowSuccessRate => "LOW_SUCCESS_RATE",
            Self::AgentError => "AGENT_ERROR",
            Self::AgentStatusFlapping => "AGENT_STATUS_FLAPPING",
            Self::HighErrorRate => "HIGH_ERROR_RATE",
            Self::StaleData => "STALE_DATA",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: i64,
    pub acknowledged: bool,
    pub resolved: bool,
    pub acknowledged_at: Option<i64>,
    pub resolved_at: Option<i64>,
}

/// Inputs the detector needs each tick. Derived from the state manager and
/// metrics collector; kept as a plain struct so the detector stays a pure
/// function of its inputs (matches the health calculator's determinism
/// requirement in spirit, though not explicitly required by spec §8).
#[derive(Debug, Clone, Default)]
pub struct AnomalyInputs {
    pub avg_poll_duration_ms: i64,
    pub success_rate: f64,
    pub total_polls: u64,
    pub agent_activity_error: u64,
    pub error_agent_keys: Vec<String>,
    pub recent_error_log_count_1m: u64,
    pub last_update_age_ms: i64,
    pub status_flap_counts: HashMap<String, usize>,
}

pub struct AnomalyDetector {
    active: Vec<Alert>,
    history: Vec<Alert>,
    max_alerts: usize,
    last_alert_at: HashMap<String, i64>,
    cooldown_ms: i64,
    next_id: u64,
    thresholds: Thresholds,
}

impl AnomalyDetector {
    pub fn new(cooldown_ms: i64) -> Self {
        Self {
            active: Vec::new(),
            history: Vec::new(),
            max_alerts: DEFAULT_MAX_ALERTS,
            last_alert_at: HashMap::new(),
            cooldown_ms,
            next_id: 0,
            thresholds: Thresholds::default(),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Replace the live threshold set. Takes effect on the next `evaluate`.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
    }

    fn cooldown_key(kind: &str, entity_key: &str) -> String {
        format!("{kind}:{entity_key}")
    }

    fn on_cooldown(&self, kind: &str, entity_key: &str, now: i64) -> bool {
        match self.last_alert_at.get(&Self::cooldown_key(kind, entity_key)) {
            Some(&t0) => now < t0 + self.cooldown_ms,
            None => false,
        }
    }

    fn emit(&mut self, kind: AlertType, entity_key: &str, severity: AlertSeverity, message: String, details: serde_json::Value, now: i64) {
        if self.on_cooldown(kind.as_str(), entity_key, now) {
            return;
        }
        self.last_alert_at.insert(Self::cooldown_key(kind.as_str(), entity_key), now);
        self.next_id += 1;
        let alert = Alert {
            id: format!("alert-{now}-{}", self.next_id),
            kind: kind.as_str().to_owned(),
            severity,
            message,
            details,
            timestamp: now,
            acknowledged: false,
            resolved: false,
            acknowledged_at: None,
            resolved_at: None,
        };
        self.history.insert(0, alert.clone());
        self.history.truncate(MAX_ALERT_HISTORY);
        self.active.insert(0, alert);
        self.active.truncate(self.max_alerts);
    }

    /// Evaluate every threshold against `inputs`, emitting alerts subject to
    /// per-`(type, entityKey)` cooldown.
    pub fn evaluate(&mut self, inputs: &AnomalyInputs, now: i64) {
        let t = self.thresholds;

        if inputs.avg_poll_duration_ms >= t.slow_response_critical_ms {
            self.emit(
                AlertType::SlowResponse,
                "poller",
                AlertSeverity::Critical,
                format!("poll duration {}ms", inputs.avg_poll_duration_ms),
                serde_json::json!({"avgPollDuration": inputs.avg_poll_duration_ms}),
                now,
            );
        } else if inputs.avg_poll_duration_ms >= t.slow_response_warning_ms {
            self.emit(
                AlertType::SlowResponse,
                "poller",
                AlertSeverity::Warning,
                format!("poll duration {}ms", inputs.avg_poll_duration_ms),
                serde_json::json!({"avgPollDuration": inputs.avg_poll_duration_ms}),
                now,
            );
        }

        if inputs.total_polls >= 5 {
            if inputs.success_rate < t.low_success_rate_critical_pct {
                self.emit(
                    AlertType::LowSuccessRate,
                    "poller",
                    AlertSeverity::Critical,
                    format!("success rate {}%", inputs.success_rate),
                    serde_json::json!({"successRate": inputs.success_rate}),
                    now,
                );
            } else if inputs.success_rate < t.low_success_rate_warning_pct {
                self.emit(
                    AlertType::LowSuccessRate,
                    "poller",
                    AlertSeverity::Warning,
                    format!("success rate {}%", inputs.success_rate),
                    serde_json::json!({"successRate": inputs.success_rate}),
                    now,
                );
            }
        }

        if inputs.agent_activity_error > 0 {
            for key in &inputs.error_agent_keys {
                self.emit(
                    AlertType::AgentError,
                    key,
                    AlertSeverity::Critical,
                    format!("agent {key} entered error state"),
                    serde_json::json!({"agent": key}),
                    now,
                );
            }
        }

        for (entity_key, count) in &inputs.status_flap_counts {
            if *count >= t.flapping_threshold {
                self.emit(
                    AlertType::AgentStatusFlapping,
                    entity_key,
                    AlertSeverity::Warning,
                    format!("{entity_key} changed status {count} times in the last minute"),
                    serde_json::json!({"changeCount": count}),
                    now,
                );
            }
        }

        if inputs.recent_error_log_count_1m >= t.high_error_rate_critical_count {
            self.emit(
                AlertType::HighErrorRate,
                "logs",
                AlertSeverity::Critical,
                format!("{} errors in the last minute", inputs.recent_error_log_count_1m),
                serde_json::json!({"count": inputs.recent_error_log_count_1m}),
                now,
            );
        } else if inputs.recent_error_log_count_1m >= t.high_error_rate_warning_count {
            self.emit(
                AlertType::HighErrorRate,
                "logs",
                AlertSeverity::Warning,
                format!("{} errors in the last minute", inputs.recent_error_log_count_1m),
                serde_json::json!({"count": inputs.recent_error_log_count_1m}),
                now,
            );
        }

        if inputs.last_update_age_ms >= t.stale_data_ms {
            self.emit(
                AlertType::StaleData,
                "state",
                AlertSeverity::Warning,
                format!("no update in {}ms", inputs.last_update_age_ms),
                serde_json::json!({"ageMs": inputs.last_update_age_ms}),
                now,
            );
        }
    }

    pub fn acknowledge(&mut self, id: &str, now: i64) -> bool {
        if let Some(alert) = self.active.iter_mut().find(|a| a.id == id) {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(now);
            true
        } else {
            false
        }
    }

    pub fn resolve(&mut self, id: &str, now: i64) -> bool {
        if let Some(alert) = self.active.iter_mut().find(|a| a.id == id) {
            alert.resolved = true;
            alert.resolved_at = Some(now);
            true
        } else {
            false
        }
    }

    /// Remove an alert from the active list (emits `alertDismissed` at the
    /// call site, not here — dismissal is a bus concern, not detector state).
    pub fn dismiss(&mut self, id: &str) -> bool {
        let before = self.active.len();
        self.active.retain(|a| a.id != id);
        self.active.len() != before
    }

    pub fn active_alerts(&self) -> &[Alert] {
        &self.active
    }

    /// Every alert ever emitted (bounded to [`MAX_ALERT_HISTORY`]), newest
    /// first — unlike `active_alerts`, dismissal does not remove an entry.
    pub fn history(&self) -> &[Alert] {
        &self.history
    }
}

/// Detect flapping: `true` once an entity's status-history timestamps
/// within the trailing 60s window reach [`FLAPPING_THRESHOLD`] changes.
pub fn is_flapping(change_timestamps: &[i64], now: i64) -> bool {
    change_timestamps.iter().filter(|&&t| now - t <= FLAPPING_WINDOW_MS).count() >= FLAPPING_THRESHOLD
}

#[cfg(test)]
mod anomaly_tests;
