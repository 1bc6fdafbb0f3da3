// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Byte-offset log tailer (spec §4.4.3). Independent of the JSONL file
//! watcher: it watches the same tree for its own pattern (`*.log`) and
//! tracks a per-path read offset rather than a line count.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::model::LogEntry;
use crate::parse::log::parse_log_line;
use crate::state::StateManager;

use super::pathutil::rig_and_agent_for_file;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);
const REPLAY_LINES: usize = 50;

fn is_log_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("log")
}

pub struct LogsWatcher {
    gt_dir: PathBuf,
    state: Arc<StateManager>,
    offsets: Mutex<HashMap<PathBuf, u64>>,
    generations: Mutex<HashMap<PathBuf, u64>>,
}

impl LogsWatcher {
    pub fn new(gt_dir: PathBuf, state: Arc<StateManager>) -> Self {
        Self { gt_dir, state, offsets: Mutex::new(HashMap::new()), generations: Mutex::new(HashMap::new()) }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(PathBuf, bool)>();
        let gt_dir = self.gt_dir.clone();

        let _watcher_task = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let (raw_tx, raw_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
            let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
                let _ = raw_tx.send(res);
            })?;
            watcher.watch(&gt_dir, RecursiveMode::Recursive)?;
            for res in raw_rx {
                let Ok(event) = res else { continue };
                let is_create = matches!(event.kind, EventKind::Create(_));
                for path in event.paths {
                    if tx.send((path, is_create)).is_err() {
                        return Ok(());
                    }
                }
            }
            Ok(())
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    match event {
                        Some((path, is_create)) => self.schedule(path, is_create).await,
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn schedule(self: &Arc<Self>, path: PathBuf, is_create: bool) {
        if !is_log_file(&path) {
            return;
        }
        let generation = {
            let mut gens = self.generations.lock().await;
            let slot = gens.entry(path.clone()).or_insert(0);
            *slot += 1;
            *slot
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_WINDOW).await;
            let still_current = this.generations.lock().await.get(&path).copied() == Some(generation);
            if still_current {
                if is_create {
                    this.on_create(&path).await;
                } else {
                    this.on_change(&path).await;
                }
            }
        });
    }

    /// Initialize the offset at the file's current size and replay the last
    /// [`REPLAY_LINES`] lines for context.
    async fn on_create(&self, path: &Path) {
        let Ok(meta) = tokio::fs::metadata(path).await else { return };
        let size = meta.len();
        self.offsets.lock().await.insert(path.to_path_buf(), size);

        let Ok(text) = tokio::fs::read_to_string(path).await else { return };
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(REPLAY_LINES);
        self.emit_lines(path, &lines[start..]).await;
    }

    /// If the file shrank since the recorded offset, treat it as rotated and
    /// reset to zero. Otherwise read the delta and parse it line-by-line.
    async fn on_change(&self, path: &Path) {
        let Ok(meta) = tokio::fs::metadata(path).await else { return };
        let size = meta.len();
        let mut offsets = self.offsets.lock().await;
        let recorded = offsets.get(path).copied().unwrap_or(0);

        let read_from = if size < recorded { 0 } else { recorded };
        offsets.insert(path.to_path_buf(), size);
        drop(offsets);

        if size <= read_from {
            return;
        }
        let Ok(mut file) = tokio::fs::File::open(path).await else { return };
        if file.seek(std::io::SeekFrom::Start(read_from)).await.is_err() {
            return;
        }
        let mut buf = String::new();
        if file.read_to_string(&mut buf).await.is_err() {
            return;
        }
        let lines: Vec<&str> = buf.lines().collect();
        self.emit_lines(path, &lines).await;
    }

    async fn emit_lines(&self, path: &Path, lines: &[&str]) {
        let Some((rig, agent)) = rig_and_agent_for_file(&self.gt_dir, path) else { return };
        let log_type = path.file_stem().and_then(|s| s.to_str()).unwrap_or("log").to_owned();
        let now = crate::now_ms();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let parsed = parse_log_line(line);
            let entry = LogEntry {
                timestamp: parsed.timestamp.unwrap_or(now),
                level: parsed.level,
                message: parsed.message,
                rig: rig.clone(),
                agent: agent.clone(),
                log_type: log_type.clone(),
                source: path.display().to_string(),
            };
            self.state.add_log(entry, now).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn on_create_replays_last_fifty_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("town.log");
        let content: String = (0..80).map(|i| format!("line {i}\n")).collect();
        tokio::fs::write(&path, &content).await.expect("write");

        let bus = Arc::new(crate::bus::Bus::new());
        let state = Arc::new(StateManager::new(bus, 3_600_000, 1000));
        let watcher = LogsWatcher::new(dir.path().to_path_buf(), state.clone());
        watcher.on_create(&path).await;

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.logs.len(), REPLAY_LINES);
    }

    #[tokio::test]
    async fn on_change_detects_rotation_and_resets_offset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("daemon.log");
        tokio::fs::write(&path, "a\nb\nc\nd\ne\n").await.expect("write");

        let bus = Arc::new(crate::bus::Bus::new());
        let state = Arc::new(StateManager::new(bus, 3_600_000, 1000));
        let watcher = LogsWatcher::new(dir.path().to_path_buf(), state.clone());
        watcher.offsets.lock().await.insert(path.clone(), 100);

        tokio::fs::write(&path, "x\n").await.expect("rewrite smaller");
        watcher.on_change(&path).await;

        assert_eq!(*watcher.offsets.lock().await.get(&path).expect("offset recorded"), 2);
    }
}
