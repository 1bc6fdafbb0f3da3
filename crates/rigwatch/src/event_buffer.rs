// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, time-ordered event sequence with binary-search retrieval
//! (spec §4.2). Single-owner: the state manager is the only writer.

use serde::{Deserialize, Serialize};

/// One entry in the buffer. `kind` drives replay semantics in
/// [`EventBuffer::state_at_time`]; `payload` is opaque to the buffer itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedEvent {
    pub timestamp: i64,
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Result of [`EventBuffer::state_at_time`]. Always tagged `is_replay` per
/// spec §4.2 and the timeline-replay scenario in §8.F.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayState {
    pub data: serde_json::Value,
    pub is_replay: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineBounds {
    pub earliest: Option<i64>,
    pub latest: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStats {
    pub count: usize,
    pub max_events: usize,
    pub max_age_ms: i64,
    pub oldest_age_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMarker {
    pub timestamp: i64,
    pub kind: String,
}

/// Non-decreasing-by-timestamp sequence, pruned by age and count on every
/// insert (spec §4.2 invariants).
pub struct EventBuffer {
    events: Vec<BufferedEvent>,
    max_age_ms: i64,
    max_events: usize,
}

impl EventBuffer {
    pub fn new(max_age_ms: i64, max_events: usize) -> Self {
        Self { events: Vec::new(), max_age_ms, max_events }
    }

    /// Insert in sorted position (binary search handles out-of-order
    /// arrivals), then prune by age relative to `now` and cap by count,
    /// dropping oldest entries first.
    pub fn add_event(&mut self, mut event: BufferedEvent, now: i64) {
        if event.timestamp == 0 {
            event.timestamp = now;
        }
        let pos = self.events.partition_point(|e| e.timestamp <= event.timestamp);
        self.events.insert(pos, event);

        let cutoff = now - self.max_age_ms;
        let keep_from = self.events.partition_point(|e| e.timestamp < cutoff);
        if keep_from > 0 {
            self.events.drain(0..keep_from);
        }
        if self.events.len() > self.max_events {
            let excess = self.events.len() - self.max_events;
            self.events.drain(0..excess);
        }
    }

    /// Inclusive range `[start, end]` via two binary searches.
    pub fn events_between(&self, start: i64, end: i64) -> &[BufferedEvent] {
        let from = self.events.partition_point(|e| e.timestamp < start);
        let to = self.events.partition_point(|e| e.timestamp <= end);
        &self.events[from..to]
    }

    /// Most recent event with `timestamp <= t`, if any.
    pub fn event_at_time(&self, t: i64) -> Option<&BufferedEvent> {
        let idx = self.events.partition_point(|e| e.timestamp <= t);
        if idx == 0 {
            None
        } else {
            self.events.get(idx - 1)
        }
    }

    /// Replay derivation: fold events with `timestamp <= t` starting from an
    /// empty object. `snapshot` events replace the state wholesale;
    /// `hooks:updated` events merge their `hooks` field into the state's
    /// `hooks` object. Other kinds are ignored by replay (spec only names
    /// these two folding rules).
    pub fn state_at_time(&self, t: i64) -> ReplayState {
        let idx = self.events.partition_point(|e| e.timestamp <= t);
        let mut data = serde_json::json!({});
        for event in &self.events[..idx] {
            match event.kind.as_str() {
                "snapshot" => data = event.payload.clone(),
                "hooks:updated" => {
                    if let Some(hooks) = event.payload.get("hooks") {
                        merge_object_field(&mut data, "hooks", hooks);
                    }
                }
                _ => {}
            }
        }
        ReplayState { data, is_replay: true }
    }

    pub fn event_markers(&self) -> Vec<EventMarker> {
        self.events.iter().map(|e| EventMarker { timestamp: e.timestamp, kind: e.kind.clone() }).collect()
    }

    pub fn timeline_bounds(&self) -> TimelineBounds {
        TimelineBounds {
            earliest: self.events.first().map(|e| e.timestamp),
            latest: self.events.last().map(|e| e.timestamp),
        }
    }

    pub fn stats(&self, now: i64) -> BufferStats {
        BufferStats {
            count: self.events.len(),
            max_events: self.max_events,
            max_age_ms: self.max_age_ms,
            oldest_age_ms: self.events.first().map(|e| now - e.timestamp),
        }
    }

    pub fn all_events(&self) -> &[BufferedEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

fn merge_object_field(into: &mut serde_json::Value, field: &str, value: &serde_json::Value) {
    if !into.is_object() {
        *into = serde_json::json!({});
    }
    let Some(obj) = into.as_object_mut() else { return };
    let merged = match (obj.get(field), value.as_object()) {
        (Some(existing), Some(incoming)) if existing.is_object() => {
            let mut merged = existing.as_object().cloned().unwrap_or_default();
            for (k, v) in incoming {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => value.clone(),
    };
    obj.insert(field.to_owned(), merged);
}

#[cfg(test)]
mod event_buffer_tests;
