// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Real-time observability service for a fleet of autonomous coding agents.
#[derive(Debug, Clone, Parser)]
#[command(name = "rigwatch", version, about)]
pub struct Config {
    /// Root directory of rig working trees.
    #[arg(long, env = "GT_DIR")]
    pub gt_dir: Option<PathBuf>,

    /// HTTP/WebSocket listen port.
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "RIGWATCH_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Poller cadence in milliseconds.
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 5_000)]
    pub poll_interval_ms: u64,

    /// Metrics broadcast cadence in milliseconds.
    #[arg(long, env = "METRICS_BROADCAST_INTERVAL", default_value_t = 5_000)]
    pub metrics_broadcast_interval_ms: u64,

    /// Log verbosity (debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Alert cooldown window in milliseconds, keyed by (type, entity).
    #[arg(long, env = "RIGWATCH_ALERT_COOLDOWN_MS", default_value_t = 300_000)]
    pub alert_cooldown_ms: u64,

    /// Maximum age of an event buffer entry before it is pruned.
    #[arg(long, env = "RIGWATCH_EVENT_MAX_AGE_MS", default_value_t = 10_800_000)]
    pub event_buffer_max_age_ms: u64,

    /// Maximum number of entries retained in the event buffer.
    #[arg(long, env = "RIGWATCH_EVENT_MAX_EVENTS", default_value_t = 10_000)]
    pub event_buffer_max_events: usize,

    /// Path to the state manager's persisted snapshot.
    #[arg(long, env = "RIGWATCH_STATE_PATH", default_value = "rigwatch-state.json")]
    pub state_snapshot_path: PathBuf,

    /// Path to the historical store's persisted tiers.
    #[arg(long, env = "RIGWATCH_HISTORY_PATH", default_value = "rigwatch-history.json")]
    pub historical_store_path: PathBuf,

    /// Path to the alerting rules file.
    #[arg(long, env = "RIGWATCH_RULES_PATH", default_value = "rigwatch-rules.json")]
    pub rules_path: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level run modes. Subcommand bodies are thin: argument parsing beyond
/// selecting a mode is out of this service's scope.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the ingestion pipeline only, without the HTTP/WS server.
    Watch,
    /// Run the full service: ingestion, derived signals, HTTP + push fan-out.
    Serve,
}

impl Config {
    pub fn gt_dir(&self) -> PathBuf {
        self.gt_dir.clone().unwrap_or_else(|| home_dir().join("gt"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn metrics_broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_broadcast_interval_ms)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_millis(self.alert_cooldown_ms)
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}
