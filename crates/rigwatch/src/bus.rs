// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Internal publish/subscribe bus (spec §4.3, design note §9: "Prototype-based
//! ad-hoc objects on the event bus" becomes an enumerated topic set and a
//! `Message` sum type here).
//!
//! Modeled on the teacher's [`Aggregator`](crate::state) broadcast hub: each
//! subscriber owns an independent `broadcast::Receiver`, so one subscriber
//! lagging or erroring in its own task can never block or fail another —
//! satisfying the "subscriber failure must not propagate" invariant without
//! a manual callback-list dispatcher.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::event_buffer::BufferedEvent;
use crate::model::ErrorRecord;

/// Bus topics, named exactly as spec §2/§4.3 lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Update,
    Event,
    Error,
    Metrics,
    ErrorPatterns,
    Alert,
    Forecast,
}

/// Sum type over every publishable message. `data` on the JSON-backed
/// variants is a pre-serialized value from the owning subsystem (metrics,
/// error-pattern analyzer, alerting engine) — the bus's job is ordered
/// fan-out and a monotonic timestamp, not re-deriving those payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "state")]
    State { timestamp: i64, data: serde_json::Value },
    #[serde(rename = "event")]
    Event { timestamp: i64, data: BufferedEvent },
    #[serde(rename = "error")]
    Error { timestamp: i64, data: ErrorRecord },
    #[serde(rename = "metrics")]
    Metrics { timestamp: i64, data: serde_json::Value },
    #[serde(rename = "errorPatterns")]
    ErrorPatterns { timestamp: i64, data: serde_json::Value },
    #[serde(rename = "forecast")]
    Forecast { timestamp: i64, data: serde_json::Value },
    #[serde(rename = "alert")]
    Alert { timestamp: i64, data: serde_json::Value },
    #[serde(rename = "alertUpdated")]
    AlertUpdated { timestamp: i64, data: serde_json::Value },
    #[serde(rename = "alertDismissed")]
    AlertDismissed { timestamp: i64, data: serde_json::Value },
    #[serde(rename = "shutdown")]
    Shutdown { timestamp: i64 },
}

impl Message {
    pub fn topic(&self) -> Topic {
        match self {
            Self::State { .. } => Topic::Update,
            Self::Event { .. } => Topic::Event,
            Self::Error { .. } => Topic::Error,
            Self::Metrics { .. } => Topic::Metrics,
            Self::ErrorPatterns { .. } => Topic::ErrorPatterns,
            Self::Forecast { .. } => Topic::Forecast,
            Self::Alert { .. } | Self::AlertUpdated { .. } | Self::AlertDismissed { .. } => Topic::Alert,
            Self::Shutdown { .. } => Topic::Update,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::State { timestamp, .. }
            | Self::Event { timestamp, .. }
            | Self::Error { timestamp, .. }
            | Self::Metrics { timestamp, .. }
            | Self::ErrorPatterns { timestamp, .. }
            | Self::Forecast { timestamp, .. }
            | Self::Alert { timestamp, .. }
            | Self::AlertUpdated { timestamp, .. }
            | Self::AlertDismissed { timestamp, .. }
            | Self::Shutdown { timestamp } => *timestamp,
        }
    }
}

/// Capacity of the broadcast channel. A slow subscriber that falls this far
/// behind starts missing the oldest messages it hasn't read yet (standard
/// `tokio::sync::broadcast` lag semantics) rather than blocking publishers.
const CHANNEL_CAPACITY: usize = 1024;

/// Topic-tagged pub/sub hub. One channel carries every [`Message`] variant;
/// subscribers that only care about a subset filter by [`Message::topic`].
pub struct Bus {
    tx: broadcast::Sender<Message>,
    last_timestamp: AtomicI64,
}

impl Bus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, last_timestamp: AtomicI64::new(0) }
    }

    /// Assign a timestamp that never decreases across calls, even if the
    /// wall clock does (e.g. NTP step). Publication order therefore implies
    /// timestamp order.
    pub fn next_timestamp(&self) -> i64 {
        let now = crate::now_ms();
        self.last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| Some(prev.max(now) + 1))
            .unwrap_or(now);
        self.last_timestamp.load(Ordering::SeqCst)
    }

    /// Publish a message. Never errors: with zero subscribers this is a
    /// no-op drop, matching "subscriber failure must not propagate" — here
    /// extended to "absence of subscribers is not a failure either."
    pub fn publish(&self, message: Message) {
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod bus_tests;
