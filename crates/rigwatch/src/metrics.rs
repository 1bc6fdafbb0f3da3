// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rolling-window statistics over poll cycles and agent activity (spec §4.5.1).
//! Single-owner: the poller records observations; the state manager reads a
//! snapshot to publish on the `metrics` topic.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

const DEFAULT_HISTORY_SIZE: usize = 60;
const ROTATE_INTERVAL_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetricsCounters {
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub total_events: u64,
    pub ws_connections: u64,
    pub total_ws_connections: u64,
    pub total_ws_messages: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentActivity {
    pub active: u64,
    pub hooked: u64,
    pub idle: u64,
    pub error: u64,
}

/// Everything derivable from the rolling buffers at a point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: MetricsCounters,
    pub agent_activity: AgentActivity,
    pub avg_poll_duration: i64,
    pub update_frequency: f64,
    pub success_rate: f64,
}

pub struct MetricsCollector {
    poll_durations: VecDeque<i64>,
    event_volume: VecDeque<u64>,
    timestamps: VecDeque<i64>,
    history_size: usize,
    counters: MetricsCounters,
    agent_activity: AgentActivity,
    events_this_interval: u64,
    last_rotate: i64,
}

impl MetricsCollector {
    pub fn new(history_size: usize, now: i64) -> Self {
        Self {
            poll_durations: VecDeque::with_capacity(history_size),
            event_volume: VecDeque::with_capacity(history_size),
            timestamps: VecDeque::with_capacity(history_size),
            history_size,
            counters: MetricsCounters::default(),
            agent_activity: AgentActivity::default(),
            events_this_interval: 0,
            last_rotate: now,
        }
    }

    /// One observation per poll cycle (spec §4.4.1: "records duration and
    /// success... as a single observation per cycle").
    pub fn record_poll(&mut self, duration_ms: i64, success: bool) {
        self.counters.total_polls += 1;
        if success {
            self.counters.successful_polls += 1;
        } else {
            self.counters.failed_polls += 1;
        }
        self.poll_durations.push_back(duration_ms);
        if self.poll_durations.len() > self.history_size {
            self.poll_durations.pop_front();
        }
    }

    pub fn record_event(&mut self) {
        self.counters.total_events += 1;
        self.events_this_interval += 1;
    }

    pub fn record_ws_connect(&mut self) {
        self.counters.ws_connections += 1;
        self.counters.total_ws_connections += 1;
    }

    pub fn record_ws_disconnect(&mut self) {
        self.counters.ws_connections = self.counters.ws_connections.saturating_sub(1);
    }

    pub fn record_ws_message(&mut self) {
        self.counters.total_ws_messages += 1;
    }

    pub fn set_agent_activity(&mut self, activity: AgentActivity) {
        self.agent_activity = activity;
    }

    /// Called on a 60s tick: rotate the current interval's event count into
    /// `event_volume`, stamp `timestamps`, reset the counter.
    pub fn tick(&mut self, now: i64) {
        if now - self.last_rotate < ROTATE_INTERVAL_MS {
            return;
        }
        self.event_volume.push_back(self.events_this_interval);
        if self.event_volume.len() > self.history_size {
            self.event_volume.pop_front();
        }
        self.timestamps.push_back(now);
        if self.timestamps.len() > self.history_size {
            self.timestamps.pop_front();
        }
        self.events_this_interval = 0;
        self.last_rotate = now;
    }

    pub fn avg_poll_duration(&self) -> i64 {
        if self.poll_durations.is_empty() {
            return 0;
        }
        let sum: i64 = self.poll_durations.iter().sum();
        (sum as f64 / self.poll_durations.len() as f64).round() as i64
    }

    pub fn update_frequency(&self) -> f64 {
        let recent: Vec<u64> = self.event_volume.iter().rev().take(5).copied().collect();
        if recent.is_empty() {
            return 0.0;
        }
        let mean = recent.iter().sum::<u64>() as f64 / recent.len() as f64;
        (mean * 10.0).round() / 10.0
    }

    pub fn success_rate(&self) -> f64 {
        if self.counters.total_polls == 0 {
            return 100.0;
        }
        let rate = 100.0 * self.counters.successful_polls as f64 / self.counters.total_polls as f64;
        (rate * 10.0).round() / 10.0
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters,
            agent_activity: self.agent_activity,
            avg_poll_duration: self.avg_poll_duration(),
            update_frequency: self.update_frequency(),
            success_rate: self.success_rate(),
        }
    }

    pub fn event_volume_history(&self) -> &VecDeque<u64> {
        &self.event_volume
    }
}

#[cfg(test)]
mod metrics_tests;
