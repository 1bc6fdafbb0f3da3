// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core data model (spec §3): rigs, agents, beads, hooks, mail, logs, and the
//! derived per-entity history/stats the state manager owns.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A top-level project. Replaced wholesale on each successful poll — never
/// partially mutated (spec §3 invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rig {
    pub name: String,
    pub polecats: u32,
    pub crew: u32,
    pub agents: Vec<String>,
    pub status: RigStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RigStatus {
    Active,
    Idle,
    Unknown,
}

impl Default for RigStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// An agent process associated with a rig directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub rig: String,
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub has_work: bool,
    pub current_bead: Option<String>,
    pub session_running: bool,
}

impl Agent {
    /// Keyed as `"rig/name"` throughout the manager's maps.
    pub fn key(&self) -> String {
        agent_key(&self.rig, &self.name)
    }
}

pub fn agent_key(rig: &str, agent: &str) -> String {
    format!("{rig}/{agent}")
}

pub fn bead_key(rig: &str, id: &str) -> String {
    format!("{rig}/{id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Polecat,
    Crew,
    Witness,
    Refinery,
    Mayor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Idle,
    Stopped,
    Unknown,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work tracked by the external issue tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub rig: String,
    pub title: String,
    pub status: BeadStatus,
    pub priority: Option<BeadPriority>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub owner: Option<String>,
    pub assignee: Option<String>,
    #[serde(rename = "type")]
    pub bead_type: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub closed_at: Option<i64>,
}

impl Bead {
    pub fn key(&self) -> String {
        bead_key(&self.rig, &self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Open,
    Hooked,
    InProgress,
    Done,
    Closed,
}

impl BeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Hooked => "hooked",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Closed => "closed",
        }
    }

    /// Ordering used by the forecaster's per-bead ETA ranking:
    /// in_progress > hooked > open.
    pub fn queue_rank(&self) -> u8 {
        match self {
            Self::InProgress => 0,
            Self::Hooked => 1,
            Self::Open => 2,
            Self::Done | Self::Closed => 3,
        }
    }
}

impl std::fmt::Display for BeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl BeadPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

/// The association between an agent and the bead it is currently working on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    pub rig: String,
    pub agent: String,
    pub bead: Option<String>,
    pub title: Option<String>,
    pub molecule: Option<String>,
    pub autonomous_mode: bool,
    pub attached_at: Option<i64>,
}

/// Append-only mail record, bounded to the 50 most recent in the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailEvent {
    pub rig: String,
    pub to: String,
    pub from: String,
    pub preview: String,
    pub path: String,
    pub timestamp: i64,
}

impl MailEvent {
    pub const PREVIEW_MAX: usize = 100;

    /// Truncate `preview` to the declared byte-safe character cap.
    pub fn capped_preview(raw: &str) -> String {
        raw.chars().take(Self::PREVIEW_MAX).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// A single parsed log line, bounded to the 500 most recent in the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
    pub rig: String,
    pub agent: Option<String>,
    pub log_type: String,
    pub source: String,
}

/// A structured error record surfaced via snapshot/`error` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub severity: ErrorSeverity,
    pub source: String,
    pub message: String,
    pub retry_count: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Warning,
    Error,
}

/// A detected agent- or bead-status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub entity_key: String,
    pub from: String,
    pub to: String,
    pub timestamp: i64,
}

/// One completed bead's duration, attributed to the agent that hooked it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub bead_id: String,
    pub title: String,
    pub completed_at: i64,
    pub duration: Option<i64>,
}

/// Rolling completion log and derived averages for one agent (`"rig/agent"` key).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    pub completions: Vec<Completion>,
    pub total_completed: u64,
    pub avg_duration: Option<f64>,
}

impl AgentStats {
    pub const MAX_COMPLETIONS: usize = 50;

    /// Append a completion (newest-first), recompute totals and the mean
    /// duration over completions with a known duration.
    pub fn record(&mut self, completion: Completion) {
        self.completions.insert(0, completion);
        self.completions.truncate(Self::MAX_COMPLETIONS);
        self.total_completed += 1;
        let known: Vec<i64> = self.completions.iter().filter_map(|c| c.duration).collect();
        self.avg_duration = if known.is_empty() {
            None
        } else {
            Some(known.iter().sum::<i64>() as f64 / known.len() as f64)
        };
    }
}

/// A bounded, newest-first history of status transitions for one entity key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub from: String,
    pub to: String,
    pub timestamp: i64,
}

pub const HISTORY_MAX: usize = 50;

/// Push a new history entry newest-first and cap it at [`HISTORY_MAX`].
pub fn push_history(history: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    history.insert(0, entry);
    history.truncate(HISTORY_MAX);
}

/// Sets affected by an error-pattern cluster, kept small and serializable.
pub type AffectedSet = HashSet<String>;

/// Convenience alias for rig-scoped maps the manager replaces wholesale.
pub type RigMap<T> = HashMap<String, T>;
