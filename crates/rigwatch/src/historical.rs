// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-tier time-series store for poll/event/agent-activity metrics and
//! per-agent completions, persisted as JSON (spec §4.7). Raw minute samples
//! are promoted into hourly aggregates once they age out of the 1 h raw
//! window, and hourly aggregates are promoted into daily aggregates once
//! they age out of the 30 d hourly window.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::metrics::AgentActivity;
use crate::model::Completion;

const RAW_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;
const HOURLY_RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000;
const DAILY_RETENTION_MS: i64 = 365 * 24 * 60 * 60 * 1000;
const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;
const CLEANUP_EVERY_N_INSERTS: u64 = 100;
const SAVE_TICK: std::time::Duration = std::time::Duration::from_secs(5 * 60);
const MAX_COMPLETIONS_PER_AGENT: usize = 1000;
const MAX_RECENT_COMPLETIONS: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: i64,
    pub poll_duration: i64,
    pub event_volume: u64,
    pub agent_activity: AgentActivity,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AggStat {
    pub avg: f64,
    pub min: i64,
    pub max: i64,
    pub count: usize,
}

impl AggStat {
    fn from_values(values: &[i64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        Self {
            avg: values.iter().sum::<i64>() as f64 / values.len() as f64,
            min: *values.iter().min().unwrap(),
            max: *values.iter().max().unwrap(),
            count: values.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EventVolumeAgg {
    pub total: u64,
    pub avg: f64,
    pub max: u64,
}

impl EventVolumeAgg {
    fn from_values(values: &[u64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let total: u64 = values.iter().sum();
        Self { total, avg: total as f64 / values.len() as f64, max: *values.iter().max().unwrap() }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ActivityBucketStat {
    pub avg: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ActivityAgg {
    pub active: ActivityBucketStat,
    pub hooked: ActivityBucketStat,
    pub idle: ActivityBucketStat,
    pub error: ActivityBucketStat,
}

impl ActivityAgg {
    fn from_samples(samples: &[AgentActivity]) -> Self {
        fn bucket(values: &[u64]) -> ActivityBucketStat {
            if values.is_empty() {
                return ActivityBucketStat::default();
            }
            let sum: u64 = values.iter().sum();
            ActivityBucketStat {
                avg: sum as f64 / values.len() as f64,
                max: *values.iter().max().unwrap() as f64,
            }
        }
        ActivityAgg {
            active: bucket(&samples.iter().map(|a| a.active).collect::<Vec<_>>()),
            hooked: bucket(&samples.iter().map(|a| a.hooked).collect::<Vec<_>>()),
            idle: bucket(&samples.iter().map(|a| a.idle).collect::<Vec<_>>()),
            error: bucket(&samples.iter().map(|a| a.error).collect::<Vec<_>>()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Aggregate {
    pub timestamp: i64,
    pub poll_duration: AggStat,
    pub event_volume: EventVolumeAgg,
    pub agent_activity: ActivityAgg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Minute,
    Hour,
    Day,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuerySeries {
    Raw(Vec<RawSample>),
    Aggregated(Vec<Aggregate>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub count: usize,
    pub avg: f64,
    pub min: i64,
    pub max: i64,
    pub anomaly_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub raw_count: usize,
    pub hourly_count: usize,
    pub daily_count: usize,
    pub tracked_agents: usize,
    pub total_completions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEfficiency {
    pub completion_count: usize,
    pub avg_duration: Option<f64>,
    pub min_duration: Option<i64>,
    pub max_duration: Option<i64>,
    pub recent: Vec<Completion>,
}

#[derive(Default, Serialize, Deserialize)]
struct Persisted {
    raw: Vec<RawSample>,
    hourly: Vec<Aggregate>,
    daily: Vec<Aggregate>,
    completions: HashMap<String, VecDeque<Completion>>,
}

struct Inner {
    raw: Vec<RawSample>,
    hourly: Vec<Aggregate>,
    daily: Vec<Aggregate>,
    completions: HashMap<String, VecDeque<Completion>>,
    dirty: bool,
    insert_count: u64,
}

pub struct HistoricalStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl HistoricalStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            inner: Mutex::new(Inner {
                raw: Vec::new(),
                hourly: Vec::new(),
                daily: Vec::new(),
                completions: HashMap::new(),
                dirty: false,
                insert_count: 0,
            }),
        }
    }

    pub async fn load(&self) -> anyhow::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let bytes = tokio::fs::read(&self.path).await?;
        let persisted: Persisted = serde_json::from_slice(&bytes)?;
        let mut inner = self.inner.lock().await;
        inner.raw = persisted.raw;
        inner.hourly = persisted.hourly;
        inner.daily = persisted.daily;
        inner.completions = persisted.completions;
        Ok(())
    }

    pub async fn record_metrics(&self, sample: RawSample) {
        let mut inner = self.inner.lock().await;
        inner.raw.push(sample);
        inner.dirty = true;
        inner.insert_count += 1;
        if inner.insert_count % CLEANUP_EVERY_N_INSERTS == 0 {
            run_cleanup(&mut inner, sample.timestamp);
        }
    }

    pub async fn record_agent_completion(&self, agent_key: &str, completion: Completion) {
        let mut inner = self.inner.lock().await;
        let log = inner.completions.entry(agent_key.to_owned()).or_default();
        log.push_front(completion);
        log.truncate(MAX_COMPLETIONS_PER_AGENT);
        inner.dirty = true;
    }

    pub async fn query_range(&self, start: i64, end: i64, interval: Interval) -> QuerySeries {
        let inner = self.inner.lock().await;
        let resolved = match interval {
            Interval::Auto => resolve_auto(start, end),
            other => other,
        };
        match resolved {
            Interval::Minute => {
                QuerySeries::Raw(inner.raw.iter().filter(|s| s.timestamp >= start && s.timestamp <= end).copied().collect())
            }
            Interval::Day => {
                QuerySeries::Aggregated(inner.daily.iter().filter(|a| a.timestamp >= start && a.timestamp <= end).copied().collect())
            }
            Interval::Hour | Interval::Auto => {
                let mut hourly: Vec<Aggregate> =
                    inner.hourly.iter().filter(|a| a.timestamp >= start && a.timestamp <= end).copied().collect();
                let promoted_cutoff = hourly.iter().map(|a| a.timestamp + HOUR_MS).max().unwrap_or(start);
                let unpromoted: Vec<RawSample> = inner
                    .raw
                    .iter()
                    .filter(|s| s.timestamp >= promoted_cutoff.max(start) && s.timestamp <= end)
                    .copied()
                    .collect();
                hourly.extend(bucket_raw_into_hours(&unpromoted));
                hourly.sort_by_key(|a| a.timestamp);
                QuerySeries::Aggregated(hourly)
            }
        }
    }

    pub async fn get_summary(&self, start: i64, end: i64) -> PeriodSummary {
        let inner = self.inner.lock().await;
        let in_range: Vec<i64> =
            inner.raw.iter().filter(|s| s.timestamp >= start && s.timestamp <= end).map(|s| s.poll_duration).collect();
        if in_range.is_empty() {
            return PeriodSummary { count: 0, avg: 0.0, min: 0, max: 0, anomaly_indices: Vec::new() };
        }
        let stat = AggStat::from_values(&in_range);
        PeriodSummary {
            count: stat.count,
            avg: stat.avg,
            min: stat.min,
            max: stat.max,
            anomaly_indices: iqr_anomaly_indices(&in_range),
        }
    }

    pub async fn get_agent_efficiency(&self, agent: Option<&str>, start: i64, end: i64) -> AgentEfficiency {
        let inner = self.inner.lock().await;
        let completions: Vec<Completion> = match agent {
            Some(key) => inner.completions.get(key).cloned().unwrap_or_default().into(),
            None => inner.completions.values().flat_map(|v| v.iter().cloned()).collect(),
        };
        let mut in_range: Vec<Completion> =
            completions.into_iter().filter(|c| c.completed_at >= start && c.completed_at <= end).collect();
        in_range.sort_by_key(|c| std::cmp::Reverse(c.completed_at));

        let durations: Vec<i64> = in_range.iter().filter_map(|c| c.duration).collect();
        let avg_duration =
            if durations.is_empty() { None } else { Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64) };

        AgentEfficiency {
            completion_count: in_range.len(),
            avg_duration,
            min_duration: durations.iter().min().copied(),
            max_duration: durations.iter().max().copied(),
            recent: in_range.into_iter().take(MAX_RECENT_COMPLETIONS).collect(),
        }
    }

    pub async fn storage_stats(&self) -> StorageStats {
        let inner = self.inner.lock().await;
        StorageStats {
            raw_count: inner.raw.len(),
            hourly_count: inner.hourly.len(),
            daily_count: inner.daily.len(),
            tracked_agents: inner.completions.len(),
            total_completions: inner.completions.values().map(|v| v.len()).sum(),
        }
    }

    /// Background tick: retention cleanup and an idempotent save every 5 min.
    pub async fn run(self: std::sync::Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(SAVE_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let now = crate::now_ms();
            {
                let mut inner = self.inner.lock().await;
                run_cleanup(&mut inner, now);
            }
            if let Err(e) = self.save().await {
                tracing::warn!(err = %e, "historical store save failed");
            }
        }
        let _ = self.save().await;
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.dirty {
            return Ok(());
        }
        let persisted = Persisted {
            raw: inner.raw.clone(),
            hourly: inner.hourly.clone(),
            daily: inner.daily.clone(),
            completions: inner.completions.clone(),
        };
        inner.dirty = false;
        drop(inner);

        let json = serde_json::to_vec_pretty(&persisted)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

fn resolve_auto(start: i64, end: i64) -> Interval {
    let span = end - start;
    if span <= 2 * HOUR_MS {
        Interval::Minute
    } else if span <= 7 * DAY_MS {
        Interval::Hour
    } else {
        Interval::Day
    }
}

fn bucket_raw_into_hours(samples: &[RawSample]) -> Vec<Aggregate> {
    let mut buckets: HashMap<i64, Vec<RawSample>> = HashMap::new();
    for sample in samples {
        let bucket_start = sample.timestamp - sample.timestamp.rem_euclid(HOUR_MS);
        buckets.entry(bucket_start).or_default().push(*sample);
    }
    let mut aggregates: Vec<Aggregate> = buckets.into_iter().map(|(ts, group)| aggregate_raw(ts, &group)).collect();
    aggregates.sort_by_key(|a| a.timestamp);
    aggregates
}

fn aggregate_raw(bucket_timestamp: i64, samples: &[RawSample]) -> Aggregate {
    let durations: Vec<i64> = samples.iter().map(|s| s.poll_duration).collect();
    let volumes: Vec<u64> = samples.iter().map(|s| s.event_volume).collect();
    let activity: Vec<AgentActivity> = samples.iter().map(|s| s.agent_activity).collect();
    Aggregate {
        timestamp: bucket_timestamp,
        poll_duration: AggStat::from_values(&durations),
        event_volume: EventVolumeAgg::from_values(&volumes),
        agent_activity: ActivityAgg::from_samples(&activity),
    }
}

fn aggregate_hourly_into_day(bucket_timestamp: i64, hours: &[Aggregate]) -> Aggregate {
    let durations: Vec<i64> = hours.iter().flat_map(|h| std::iter::repeat(h.poll_duration.avg as i64).take(h.poll_duration.count.max(1))).collect();
    let volumes: Vec<u64> = hours.iter().map(|h| h.event_volume.total).collect();
    let activity_avg = |f: fn(&Aggregate) -> f64| -> f64 {
        if hours.is_empty() {
            0.0
        } else {
            hours.iter().map(f).sum::<f64>() / hours.len() as f64
        }
    };
    let activity_max = |f: fn(&Aggregate) -> f64| -> f64 { hours.iter().map(f).fold(0.0, f64::max) };
    Aggregate {
        timestamp: bucket_timestamp,
        poll_duration: AggStat::from_values(&durations),
        event_volume: EventVolumeAgg::from_values(&volumes),
        agent_activity: ActivityAgg {
            active: ActivityBucketStat {
                avg: activity_avg(|a| a.agent_activity.active.avg),
                max: activity_max(|a| a.agent_activity.active.max),
            },
            hooked: ActivityBucketStat {
                avg: activity_avg(|a| a.agent_activity.hooked.avg),
                max: activity_max(|a| a.agent_activity.hooked.max),
            },
            idle: ActivityBucketStat {
                avg: activity_avg(|a| a.agent_activity.idle.avg),
                max: activity_max(|a| a.agent_activity.idle.max),
            },
            error: ActivityBucketStat {
                avg: activity_avg(|a| a.agent_activity.error.avg),
                max: activity_max(|a| a.agent_activity.error.max),
            },
        },
    }
}

/// Promote raw samples older than 1 h into hourly buckets, promote hourly
/// buckets older than 30 d into daily buckets, then drop anything past its
/// tier's retention window.
fn run_cleanup(inner: &mut Inner, now: i64) {
    let raw_cutoff = now - HOUR_MS;
    let (keep_raw, to_promote): (Vec<RawSample>, Vec<RawSample>) =
        inner.raw.drain(..).partition(|s| s.timestamp >= raw_cutoff);
    inner.raw = keep_raw;
    if !to_promote.is_empty() {
        inner.hourly.extend(bucket_raw_into_hours(&to_promote));
    }

    let daily_promote_cutoff = now - HOURLY_RETENTION_MS;
    let (keep_hourly, promote_hourly): (Vec<Aggregate>, Vec<Aggregate>) =
        inner.hourly.drain(..).partition(|a| a.timestamp >= daily_promote_cutoff);
    inner.hourly = keep_hourly;
    if !promote_hourly.is_empty() {
        let mut buckets: HashMap<i64, Vec<Aggregate>> = HashMap::new();
        for agg in promote_hourly {
            let bucket_start = agg.timestamp - agg.timestamp.rem_euclid(DAY_MS);
            buckets.entry(bucket_start).or_default().push(agg);
        }
        for (ts, group) in buckets {
            inner.daily.push(aggregate_hourly_into_day(ts, &group));
        }
    }

    let raw_retain_cutoff = now - RAW_RETENTION_MS;
    inner.raw.retain(|s| s.timestamp >= raw_retain_cutoff);
    let hourly_retain_cutoff = now - HOURLY_RETENTION_MS;
    inner.hourly.retain(|a| a.timestamp >= hourly_retain_cutoff);
    let daily_retain_cutoff = now - DAILY_RETENTION_MS;
    inner.daily.retain(|a| a.timestamp >= daily_retain_cutoff);
}

/// Indices of values outside `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]`.
fn iqr_anomaly_indices(values: &[i64]) -> Vec<usize> {
    if values.len() < 4 {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);
    let iqr = q3 - q1;
    let lower = q1 - 1.5 * iqr;
    let upper = q3 + 1.5 * iqr;
    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| (v as f64) < lower || (v as f64) > upper)
        .map(|(i, _)| i)
        .collect()
}

fn percentile(sorted: &[i64], p: f64) -> f64 {
    let idx = p * (sorted.len() - 1) as f64;
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    if lower == upper {
        sorted[lower] as f64
    } else {
        let frac = idx - lower as f64;
        sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
    }
}

#[cfg(test)]
mod historical_tests;
