// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watches append-only JSONL and mail files under `GT_DIR` (spec §4.4.2).
//! `notify` delivers raw filesystem events; a per-path debounce window
//! (since no debouncer crate is in the dependency stack) approximates the
//! 100 ms "await write finish" stability window before each path is
//! actually re-read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::model::MailEvent;
use crate::state::StateManager;

use super::pathutil::rig_and_agent_for_mail;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Events,
    Feed,
    BeadsIssues,
    Mail,
}

fn classify(gt_dir: &Path, path: &Path) -> Option<FileKind> {
    let name = path.file_name()?.to_str()?;
    if name == ".events.jsonl" {
        return Some(FileKind::Events);
    }
    if name == ".feed.jsonl" {
        return Some(FileKind::Feed);
    }
    if name == "issues.jsonl" && path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) == Some(".beads")
    {
        return Some(FileKind::BeadsIssues);
    }
    if rig_and_agent_for_mail(gt_dir, path).is_some() {
        return Some(FileKind::Mail);
    }
    None
}

pub struct FileWatcher {
    gt_dir: PathBuf,
    state: Arc<StateManager>,
    last_line_count: Mutex<HashMap<PathBuf, usize>>,
    generations: Mutex<HashMap<PathBuf, u64>>,
}

impl FileWatcher {
    pub fn new(gt_dir: PathBuf, state: Arc<StateManager>) -> Self {
        Self {
            gt_dir,
            state,
            last_line_count: Mutex::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// Start the notify watcher and process events until `cancel` fires.
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
        if classify(&self.gt_dir, &path).is_none() {
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
                this.process(&path, is_create).await;
            }
        });
    }

    async fn process(&self, path: &Path, is_create: bool) {
        let Some(kind) = classify(&self.gt_dir, path) else { return };
        match kind {
            FileKind::Mail if is_create => self.process_mail(path).await,
            FileKind::Mail => {}
            FileKind::Events => self.process_jsonl(path, "events").await,
            FileKind::Feed => self.process_jsonl(path, "feed").await,
            FileKind::BeadsIssues => self.process_jsonl(path, "beads_issue").await,
        }
    }

    /// Re-read `path`, slice lines past the previously recorded count, parse
    /// each new line as JSON, and push it as a buffered event. A line count
    /// that goes backwards (rotation, truncation) resets the baseline to the
    /// current count rather than re-emitting the whole file.
    async fn process_jsonl(&self, path: &Path, kind: &str) {
        let Ok(text) = tokio::fs::read_to_string(path).await else { return };
        let lines: Vec<&str> = text.lines().collect();
        let mut counts = self.last_line_count.lock().await;
        let previous = counts.get(path).copied().unwrap_or(0);
        counts.insert(path.to_path_buf(), lines.len());
        drop(counts);

        if lines.len() <= previous {
            return;
        }
        let now = crate::now_ms();
        for line in &lines[previous..] {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let payload = serde_json::from_str(trimmed)
                .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_owned()));
            self.state.add_event(kind, payload, now).await;
        }
    }

    async fn process_mail(&self, path: &Path) {
        let Some((rig, agent)) = rig_and_agent_for_mail(&self.gt_dir, path) else { return };
        let Ok(content) = tokio::fs::read_to_string(path).await else { return };
        let preview = MailEvent::capped_preview(content.trim());
        let file_from = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_owned();
        let mail = MailEvent {
            rig: rig.clone(),
            to: agent,
            from: file_from,
            preview,
            path: path.display().to_string(),
            timestamp: crate::now_ms(),
        };
        self.state.add_mail(mail, crate::now_ms()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognizes_all_four_patterns() {
        let gt_dir = Path::new("/home/u/gt");
        assert_eq!(classify(gt_dir, &gt_dir.join("r1/.events.jsonl")), Some(FileKind::Events));
        assert_eq!(classify(gt_dir, &gt_dir.join("r1/.feed.jsonl")), Some(FileKind::Feed));
        assert_eq!(classify(gt_dir, &gt_dir.join("r1/.beads/issues.jsonl")), Some(FileKind::BeadsIssues));
        assert_eq!(classify(gt_dir, &gt_dir.join("r1/crew/c1/mail/m1")), Some(FileKind::Mail));
        assert_eq!(classify(gt_dir, &gt_dir.join("r1/crew/c1/worker.log")), None);
    }

    #[tokio::test]
    async fn process_jsonl_only_emits_new_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".events.jsonl");
        tokio::fs::write(&path, "{\"a\":1}\n{\"a\":2}\n").await.expect("write");

        let bus = Arc::new(crate::bus::Bus::new());
        let state = Arc::new(StateManager::new(bus, 3_600_000, 1000));
        let watcher = FileWatcher::new(dir.path().to_path_buf(), state.clone());

        watcher.process_jsonl(&path, "events").await;
        assert_eq!(state.event_buffer.read().await.all_events().len(), 2);

        tokio::fs::write(&path, "{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n").await.expect("append");
        watcher.process_jsonl(&path, "events").await;
        assert_eq!(state.event_buffer.read().await.all_events().len(), 3);
    }
}
