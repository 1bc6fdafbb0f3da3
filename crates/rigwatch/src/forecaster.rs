// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Short-horizon load forecasting via Holt's linear exponential smoothing
//! (spec §4.6). A periodic 30 s tick samples `active + hooked` agent counts
//! into a 1 h rolling window, fits the smoother, and projects {5,15,30,60}
//! minute horizons with confidence intervals, a queue-depth estimate, and
//! per-bead ETAs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, Message};
use crate::model::{AgentStats, BeadStatus};
use crate::state::StateManager;

const TICK_INTERVAL: Duration = Duration::from_secs(30);
const WINDOW_MS: i64 = 60 * 60 * 1000;
const MIN_DATA_POINTS: usize = 10;
const MAX_CONFIDENT_SAMPLES: f64 = 120.0;
const FRESHNESS_WINDOW_MINUTES: f64 = 5.0;
const ALPHA: f64 = 0.3;
const BETA: f64 = 0.7;
const HORIZONS_MINUTES: [u32; 4] = [5, 15, 30, 60];
const DEFAULT_AVG_DURATION_MS: f64 = 300_000.0;
const MAX_BEAD_ETAS: usize = 50;

#[derive(Debug, Clone, Copy)]
struct LoadSample {
    timestamp: i64,
    total_load: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonForecast {
    pub minutes: u32,
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
    pub spike: Option<SpikeSeverity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeSeverity {
    Elevated,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDepthForecast {
    pub current: u32,
    pub throughput_per_minute: f64,
    pub horizons: Vec<(u32, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeadEta {
    pub rig: String,
    pub bead_id: String,
    pub queue_position: usize,
    pub eta_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    pub level: f64,
    pub trend: f64,
    pub stderr: f64,
    pub horizons: Vec<HorizonForecast>,
    pub queue_depth: QueueDepthForecast,
    pub bead_etas: Vec<BeadEta>,
    pub confidence: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForecastResult {
    InsufficientData { points: usize, required: usize },
    Ready(ForecastSnapshot),
}

pub struct Forecaster {
    state: Arc<StateManager>,
    bus: Arc<Bus>,
    samples: Mutex<VecDeque<LoadSample>>,
    latest: RwLock<Option<ForecastResult>>,
}

impl Forecaster {
    pub fn new(state: Arc<StateManager>, bus: Arc<Bus>) -> Self {
        Self { state, bus, samples: Mutex::new(VecDeque::new()), latest: RwLock::new(None) }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }
    }

    pub async fn latest(&self) -> Option<ForecastResult> {
        self.latest.read().await.clone()
    }

    async fn tick(&self) {
        let now = crate::now_ms();
        let counts = self.state.agent_counts().await;
        let total_load = (counts.active + counts.hooked) as f64;
        {
            let mut samples = self.samples.lock().await;
            samples.push_back(LoadSample { timestamp: now, total_load });
            while samples.front().is_some_and(|s| now - s.timestamp > WINDOW_MS) {
                samples.pop_front();
            }
        }

        let snapshot = self.state.snapshot().await;
        let result = self.compute(now, &snapshot.agent_stats, &snapshot.beads).await;

        *self.latest.write().await = Some(result.clone());
        let payload = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
        self.bus.publish(Message::Forecast { timestamp: self.bus.next_timestamp(), data: payload });
    }

    async fn compute(
        &self,
        now: i64,
        agent_stats: &std::collections::HashMap<String, AgentStats>,
        beads: &crate::model::RigMap<Vec<crate::model::Bead>>,
    ) -> ForecastResult {
        let samples: Vec<LoadSample> = self.samples.lock().await.iter().copied().collect();
        if samples.len() < MIN_DATA_POINTS {
            return ForecastResult::InsufficientData { points: samples.len(), required: MIN_DATA_POINTS };
        }

        let values: Vec<f64> = samples.iter().map(|s| s.total_load).collect();
        let holt = holt_linear(&values, ALPHA, BETA);
        let avg_interval_minutes = avg_interval_minutes(&samples);
        let (mean, stddev) = mean_stddev(&values);

        let horizons = HORIZONS_MINUTES
            .iter()
            .map(|&minutes| forecast_horizon(&holt, minutes, avg_interval_minutes, mean, stddev))
            .collect();

        let throughput = estimate_throughput(agent_stats, now, 60.0);
        let queue_depth = queue_depth_forecast(beads, throughput);
        let avg_duration = estimate_avg_duration(agent_stats);
        let bead_etas = bead_etas(beads, throughput, avg_duration);
        let confidence = confidence_score(samples.len(), samples.last().map(|s| s.timestamp), now, mean, stddev);

        ForecastResult::Ready(ForecastSnapshot {
            level: holt.level,
            trend: holt.trend,
            stderr: holt.stderr,
            horizons,
            queue_depth,
            bead_etas,
            confidence,
            timestamp: now,
        })
    }
}

struct HoltResult {
    level: f64,
    trend: f64,
    stderr: f64,
}

/// Holt's linear exponential smoothing. `values` must have at least 2
/// points (callers guard on [`MIN_DATA_POINTS`]). `stderr` is the RMS of
/// one-step-ahead residuals (`value[i] - (level[i-1] + trend[i-1])`).
fn holt_linear(values: &[f64], alpha: f64, beta: f64) -> HoltResult {
    let mut level = values[0];
    let mut trend = values[1] - values[0];
    let mut squared_residuals = Vec::with_capacity(values.len() - 1);

    for &value in &values[1..] {
        let one_step_forecast = level + trend;
        squared_residuals.push((value - one_step_forecast).powi(2));
        let new_level = alpha * value + (1.0 - alpha) * (level + trend);
        let new_trend = beta * (new_level - level) + (1.0 - beta) * trend;
        level = new_level;
        trend = new_trend;
    }

    let stderr = if squared_residuals.is_empty() {
        0.0
    } else {
        (squared_residuals.iter().sum::<f64>() / squared_residuals.len() as f64).sqrt()
    };
    HoltResult { level, trend, stderr }
}

fn avg_interval_minutes(samples: &[LoadSample]) -> f64 {
    if samples.len() < 2 {
        return TICK_INTERVAL.as_secs_f64() / 60.0;
    }
    let span_ms = (samples.last().unwrap().timestamp - samples.first().unwrap().timestamp) as f64;
    let intervals = (samples.len() - 1) as f64;
    if intervals <= 0.0 || span_ms <= 0.0 {
        return TICK_INTERVAL.as_secs_f64() / 60.0;
    }
    (span_ms / intervals) / 60_000.0
}

fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

fn forecast_horizon(
    holt: &HoltResult,
    minutes: u32,
    avg_interval_minutes: f64,
    mean: f64,
    stddev: f64,
) -> HorizonForecast {
    let steps = if avg_interval_minutes > 0.0 { minutes as f64 / avg_interval_minutes } else { 0.0 };
    let predicted = (holt.level + holt.trend * steps).max(0.0);
    let half_width = holt.stderr * 1.96 * (1.0 + steps * 0.1).sqrt();

    let spike = if predicted > mean + 2.0 * stddev {
        Some(SpikeSeverity::High)
    } else if predicted > mean + 1.5 * stddev {
        Some(SpikeSeverity::Elevated)
    } else {
        None
    };

    HorizonForecast {
        minutes,
        predicted,
        lower: (predicted - half_width).max(0.0),
        upper: predicted + half_width,
        spike,
    }
}

/// Average completions-per-minute across agents with at least one
/// completion in the trailing `window_minutes` (spec §4.6: "assume constant
/// completion rate from per-agent stats averaged").
fn estimate_throughput(
    agent_stats: &std::collections::HashMap<String, AgentStats>,
    now: i64,
    window_minutes: f64,
) -> f64 {
    let window_ms = (window_minutes * 60_000.0) as i64;
    let rates: Vec<f64> = agent_stats
        .values()
        .filter_map(|stats| {
            let count = stats.completions.iter().filter(|c| now - c.completed_at <= window_ms).count();
            if count == 0 {
                None
            } else {
                Some(count as f64 / window_minutes)
            }
        })
        .collect();
    if rates.is_empty() {
        0.0
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    }
}

fn estimate_avg_duration(agent_stats: &std::collections::HashMap<String, AgentStats>) -> f64 {
    let durations: Vec<f64> = agent_stats.values().filter_map(|s| s.avg_duration).collect();
    if durations.is_empty() {
        DEFAULT_AVG_DURATION_MS
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    }
}

fn open_bead_count(beads: &crate::model::RigMap<Vec<crate::model::Bead>>) -> u32 {
    beads
        .values()
        .flatten()
        .filter(|b| !matches!(b.status, BeadStatus::Done | BeadStatus::Closed))
        .count() as u32
}

fn queue_depth_forecast(beads: &crate::model::RigMap<Vec<crate::model::Bead>>, throughput: f64) -> QueueDepthForecast {
    let current = open_bead_count(beads);
    let horizons = HORIZONS_MINUTES
        .iter()
        .map(|&minutes| (minutes, (current as f64 - throughput * minutes as f64).max(0.0)))
        .collect();
    QueueDepthForecast { current, throughput_per_minute: throughput, horizons }
}

/// Per-bead ETA, ordered by queue priority (`in_progress > hooked > open`)
/// then original index. `ETA = queuePosition / throughput * avgDuration +
/// avgDuration`; in-progress beads are assumed half complete, so their ETA
/// is halved.
fn bead_etas(
    beads: &crate::model::RigMap<Vec<crate::model::Bead>>,
    throughput: f64,
    avg_duration_ms: f64,
) -> Vec<BeadEta> {
    let effective_throughput = if throughput > 0.0 { throughput } else { 60_000.0 / avg_duration_ms };

    let mut queued: Vec<&crate::model::Bead> = beads
        .values()
        .flatten()
        .filter(|b| !matches!(b.status, BeadStatus::Done | BeadStatus::Closed))
        .collect();
    queued.sort_by_key(|b| b.status.queue_rank());

    queued
        .into_iter()
        .take(MAX_BEAD_ETAS)
        .enumerate()
        .map(|(i, bead)| {
            let mut eta = (i as f64 / effective_throughput) * avg_duration_ms + avg_duration_ms;
            if bead.status == BeadStatus::InProgress {
                eta *= 0.5;
            }
            BeadEta { rig: bead.rig.clone(), bead_id: bead.id.clone(), queue_position: i, eta_ms: eta }
        })
        .collect()
}

fn confidence_score(sample_count: usize, last_sample_at: Option<i64>, now: i64, mean: f64, stddev: f64) -> f64 {
    let data_quantity = (sample_count as f64 / MAX_CONFIDENT_SAMPLES).min(1.0) * 0.4;

    let freshness = match last_sample_at {
        Some(ts) => {
            let age_minutes = (now - ts) as f64 / 60_000.0;
            (1.0 - age_minutes / FRESHNESS_WINDOW_MINUTES).clamp(0.0, 1.0) * 0.3
        }
        None => 0.0,
    };

    let consistency = if mean.abs() < f64::EPSILON {
        if stddev.abs() < f64::EPSILON { 0.3 } else { 0.0 }
    } else {
        (1.0 - (stddev / mean.abs())).clamp(0.0, 1.0) * 0.3
    };

    (data_quantity + freshness + consistency).clamp(0.0, 1.0)
}

#[cfg(test)]
mod forecaster_tests;
