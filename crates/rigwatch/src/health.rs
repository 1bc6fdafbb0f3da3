// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composite 0-100 health score (spec §4.5.2). Pure function of its inputs
//! plus a rolling history of past scores — deterministic per spec §8.8.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

const DEFAULT_HISTORY_SIZE: usize = 60;

const WEIGHT_ERROR_RATE: f64 = 0.35;
const WEIGHT_UPTIME: f64 = 0.30;
const WEIGHT_LATENCY: f64 = 0.20;
const WEIGHT_THROUGHPUT: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HealthComponents {
    pub uptime: f64,
    pub error_rate: f64,
    pub latency: f64,
    pub throughput: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthScore {
    pub score: u8,
    pub status: HealthStatus,
    pub components: HealthComponents,
    pub timestamp: i64,
}

/// Counts of agents by status, used for the uptime sub-score.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentCounts {
    pub total: u32,
    pub active: u32,
    pub hooked: u32,
    pub idle: u32,
}

/// Latency score: piecewise-linear, 100 at <=100ms down to 0 beyond 2000ms.
/// Anchors per spec §4.5.2: 100->100, 250->80, 500->50, 1000->20, 2000->0.
pub fn latency_score(avg_poll_duration_ms: i64) -> f64 {
    let ms = avg_poll_duration_ms as f64;
    let anchors: &[(f64, f64)] = &[(100.0, 100.0), (250.0, 80.0), (500.0, 50.0), (1000.0, 20.0), (2000.0, 0.0)];
    if ms <= anchors[0].0 {
        return anchors[0].1;
    }
    if ms >= anchors[anchors.len() - 1].0 {
        return anchors[anchors.len() - 1].1;
    }
    for pair in anchors.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if ms >= x0 && ms <= x1 {
            let t = (ms - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }
    0.0
}

/// Uptime score: no agents -> 75. Otherwise a running-ratio base plus an
/// active/hooked bonus, capped at 100.
pub fn uptime_score(counts: AgentCounts) -> f64 {
    if counts.total == 0 {
        return 75.0;
    }
    let running = counts.active + counts.hooked + counts.idle;
    let total = counts.total as f64;
    let base = running as f64 / total * 100.0;
    let bonus = (counts.active + counts.hooked) as f64 / total * 10.0;
    (base + bonus).min(100.0)
}

/// Error-rate score: step mapping from poll success rate.
pub fn error_rate_score(success_rate: f64) -> f64 {
    if success_rate >= 99.9 {
        100.0
    } else if success_rate >= 99.0 {
        95.0
    } else if success_rate >= 98.0 {
        90.0
    } else if success_rate >= 95.0 {
        75.0
    } else if success_rate >= 90.0 {
        50.0
    } else if success_rate >= 80.0 {
        25.0
    } else {
        success_rate / 4.0
    }
}

/// Throughput score: ratio of current update frequency to its historical
/// mean. No history yet (mean is zero or unavailable) scores neutrally.
pub fn throughput_score(current: f64, historical_mean: Option<f64>) -> f64 {
    let Some(mean) = historical_mean else { return 100.0 };
    if mean <= 0.0 {
        return if current <= 0.0 { 100.0 } else { 80.0 };
    }
    let ratio = current / mean;
    if (0.7..=1.5).contains(&ratio) {
        100.0
    } else if (0.5..=2.0).contains(&ratio) {
        80.0
    } else if (0.3..=3.0).contains(&ratio) {
        60.0
    } else if ratio >= 0.1 {
        40.0
    } else {
        20.0
    }
}

fn status_for(score: u8) -> HealthStatus {
    if score >= 80 {
        HealthStatus::Healthy
    } else if score >= 50 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Critical
    }
}

/// Compute the composite score from its four sub-scores. Deterministic:
/// identical inputs always produce an identical [`HealthScore`] (spec §8.8).
pub fn compute(
    success_rate: f64,
    agent_counts: AgentCounts,
    avg_poll_duration_ms: i64,
    update_frequency: f64,
    historical_mean_frequency: Option<f64>,
    now: i64,
) -> HealthScore {
    let components = HealthComponents {
        uptime: uptime_score(agent_counts),
        error_rate: error_rate_score(success_rate),
        latency: latency_score(avg_poll_duration_ms),
        throughput: throughput_score(update_frequency, historical_mean_frequency),
    };
    let weighted = components.error_rate * WEIGHT_ERROR_RATE
        + components.uptime * WEIGHT_UPTIME
        + components.latency * WEIGHT_LATENCY
        + components.throughput * WEIGHT_THROUGHPUT;
    let score = weighted.round().clamp(0.0, 100.0) as u8;
    HealthScore { score, status: status_for(score), components, timestamp: now }
}

/// Bounded rolling history of past scores (default 60 entries).
pub struct HealthHistory {
    scores: VecDeque<HealthScore>,
    max_len: usize,
}

impl HealthHistory {
    pub fn new() -> Self {
        Self { scores: VecDeque::with_capacity(DEFAULT_HISTORY_SIZE), max_len: DEFAULT_HISTORY_SIZE }
    }

    pub fn push(&mut self, score: HealthScore) {
        self.scores.push_back(score);
        if self.scores.len() > self.max_len {
            self.scores.pop_front();
        }
    }

    pub fn entries(&self) -> &VecDeque<HealthScore> {
        &self.scores
    }
}

impl Default for HealthHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod health_tests;
