// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Online clustering of error/warn log messages into pattern groups (spec
//! §4.5.4). Single-owner: fed every `error`/`warn` log entry by the state
//! manager as it arrives.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{LogLevel, LogEntry};
use crate::parse::error_pattern::{jaccard_similarity, normalize};

const DEFAULT_MAX_PATTERNS: usize = 100;
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;
const DEFAULT_MAX_ERRORS_PER_PATTERN: usize = 50;
const MAX_EXAMPLES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPatternCluster {
    pub pattern: String,
    pub level: LogLevel,
    pub count: u64,
    pub first_seen: i64,
    pub last_seen: i64,
    pub affected_agents: HashSet<String>,
    pub affected_rigs: HashSet<String>,
    pub recent_errors: Vec<LogEntry>,
    pub examples: Vec<String>,
    pub is_systemic: bool,
}

impl ErrorPatternCluster {
    fn score(&self, now: i64) -> f64 {
        let age_minutes = ((now - self.first_seen).max(0) as f64) / 60_000.0;
        let scope = self.affected_agents.len() + self.affected_rigs.len();
        self.count as f64 * 10.0 + scope as f64 * 5.0 - age_minutes
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPatternSummary {
    pub total_patterns: usize,
    pub total_occurrences: u64,
    pub systemic_count: usize,
    pub top: Vec<ErrorPatternCluster>,
}

pub struct ErrorPatternAnalyzer {
    clusters: HashMap<String, ErrorPatternCluster>,
    max_patterns: usize,
    similarity_threshold: f64,
    max_errors_per_pattern: usize,
}

impl ErrorPatternAnalyzer {
    pub fn new() -> Self {
        Self {
            clusters: HashMap::new(),
            max_patterns: DEFAULT_MAX_PATTERNS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_errors_per_pattern: DEFAULT_MAX_ERRORS_PER_PATTERN,
        }
    }

    /// Feed one log entry. No-ops for levels other than `error`/`warn`.
    pub fn observe(&mut self, entry: &LogEntry, now: i64) {
        if !matches!(entry.level, LogLevel::Error | LogLevel::Warn) {
            return;
        }
        let key = self.resolve_key(&entry.message, entry.level);
        let cluster = self.clusters.entry(key.clone()).or_insert_with(|| ErrorPatternCluster {
            pattern: key,
            level: entry.level,
            count: 0,
            first_seen: now,
            last_seen: now,
            affected_agents: HashSet::new(),
            affected_rigs: HashSet::new(),
            recent_errors: Vec::new(),
            examples: Vec::new(),
            is_systemic: false,
        });

        cluster.count += 1;
        cluster.last_seen = now;
        if let Some(agent) = &entry.agent {
            cluster.affected_agents.insert(agent.clone());
        }
        cluster.affected_rigs.insert(entry.rig.clone());
        cluster.recent_errors.insert(0, entry.clone());
        cluster.recent_errors.truncate(self.max_errors_per_pattern);
        if cluster.examples.len() < MAX_EXAMPLES && !cluster.examples.contains(&entry.message) {
            cluster.examples.push(entry.message.clone());
        }
        cluster.is_systemic = cluster.affected_agents.len() > 1 || cluster.affected_rigs.len() > 1;

        self.enforce_capacity(now);
    }

    /// Exact key match first; else join the most similar existing cluster of
    /// the same level if it clears the similarity threshold; else a new key.
    fn resolve_key(&self, message: &str, level: LogLevel) -> String {
        let normalized = normalize(message);
        if self.clusters.contains_key(&normalized) {
            return normalized;
        }
        let mut best: Option<(&str, f64)> = None;
        for (key, cluster) in &self.clusters {
            if cluster.level != level {
                continue;
            }
            let sim = jaccard_similarity(key, &normalized);
            if sim >= self.similarity_threshold && best.as_ref().map(|(_, s)| sim > *s).unwrap_or(true) {
                best = Some((key, sim));
            }
        }
        best.map(|(key, _)| key.to_owned()).unwrap_or(normalized)
    }

    fn enforce_capacity(&mut self, now: i64) {
        if self.clusters.len() <= self.max_patterns {
            return;
        }
        if let Some(worst_key) = self
            .clusters
            .iter()
            .min_by(|(_, a), (_, b)| a.score(now).partial_cmp(&b.score(now)).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, _)| k.clone())
        {
            self.clusters.remove(&worst_key);
        }
    }

    /// Patterns sorted by count desc then last_seen desc.
    pub fn patterns(&self) -> Vec<ErrorPatternCluster> {
        let mut out: Vec<ErrorPatternCluster> = self.clusters.values().cloned().collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then(b.last_seen.cmp(&a.last_seen)));
        out
    }

    pub fn summary(&self) -> ErrorPatternSummary {
        let patterns = self.patterns();
        ErrorPatternSummary {
            total_patterns: patterns.len(),
            total_occurrences: patterns.iter().map(|p| p.count).sum(),
            systemic_count: patterns.iter().filter(|p| p.is_systemic).count(),
            top: patterns.into_iter().take(5).collect(),
        }
    }
}

impl Default for ErrorPatternAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod error_patterns_tests;
