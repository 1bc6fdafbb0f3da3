// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent status probing (spec §4.4.1 "Agent status detection"). Three
//! independent signals feed the derivation: a process-table scan for a
//! canonical command-line tag, a terminal-session-lister scan for a
//! conventional session name, and directory mtimes for recent activity.
//!
//! Both probes invoke their tool argv-style (`tokio::process::Command`,
//! no shell, no string interpolation) and filter output by substring
//! match, per the command-injection invariant in spec §4.4.1/§5.

use std::path::Path;
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tokio::time::timeout;

use crate::model::AgentStatus;

const PROCESS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const SESSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const ACTIVITY_WINDOW_MS: i64 = 60_000;

/// Canonical process-tag variants a rig agent's command line may carry
/// (spec §4.4.1 step 1: `"[GAS TOWN] <rig>/<agent>"` and a few variants).
fn candidate_tags(rig: &str, agent: &str) -> Vec<String> {
    vec![
        format!("[GAS TOWN] {rig}/{agent}"),
        format!("[GASTOWN] {rig}/{agent}"),
        format!("GAS_TOWN_RIG={rig}"),
        format!("{rig}/{agent}"),
    ]
}

/// Conventional terminal-session names an agent may run under (spec
/// §4.4.1 step 2), matched case-insensitively.
fn candidate_session_names(rig: &str, agent: &str) -> Vec<String> {
    vec![
        format!("gt-{rig}-{agent}"),
        format!("hq-{agent}"),
        format!("{rig}-{agent}"),
        agent.to_owned(),
    ]
}

/// Scan the local process table for any process whose command line
/// contains one of `agent`'s candidate tags. A fresh [`System`] handle is
/// used per probe rather than one shared across the poller so a single
/// sub-poll's refresh cost doesn't serialize against other sub-polls.
pub async fn process_present(rig: &str, agent: &str) -> bool {
    let tags = candidate_tags(rig, agent);
    let result = timeout(
        PROCESS_PROBE_TIMEOUT,
        tokio::task::spawn_blocking(move || {
            let mut sys = System::new();
            sys.refresh_processes(ProcessesToUpdate::All, true);
            sys.processes().values().any(|proc| {
                let cmdline = proc
                    .cmd()
                    .iter()
                    .map(|s| s.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                tags.iter().any(|tag| cmdline.contains(tag.as_str()))
            })
        }),
    )
    .await;
    matches!(result, Ok(Ok(true)))
}

/// Scan the terminal-session lister (`tmux list-sessions -F
/// '#{session_name}'`, argv-only) for a name among `agent`'s candidates,
/// matched case-insensitively. Any failure to invoke or parse the lister
/// is treated as "no session", not an error (spec §4.1: probes never throw).
pub async fn session_present(rig: &str, agent: &str) -> bool {
    let names = candidate_session_names(rig, agent);
    let output = timeout(
        SESSION_PROBE_TIMEOUT,
        tokio::process::Command::new("tmux")
            .arg("list-sessions")
            .arg("-F")
            .arg("#{session_name}")
            .output(),
    )
    .await;

    let Ok(Ok(output)) = output else { return false };
    if !output.status.success() {
        return false;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().any(|line| {
        let line = line.trim();
        names.iter().any(|n| n.eq_ignore_ascii_case(line))
    })
}

/// Check whether any of `.events.jsonl`, `.feed.jsonl`, `session.json`
/// under `agent_dir`, or any file under `agent_dir/mail/`, has an mtime
/// within [`ACTIVITY_WINDOW_MS`] of `now` (spec §4.4.1 step 3).
pub async fn recent_activity(agent_dir: &Path, now_ms: i64) -> bool {
    for name in [".events.jsonl", ".feed.jsonl", "session.json"] {
        if mtime_within_window(&agent_dir.join(name), now_ms).await {
            return true;
        }
    }
    let mail_dir = agent_dir.join("mail");
    let Ok(mut entries) = tokio::fs::read_dir(&mail_dir).await else { return false };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if mtime_within_window(&entry.path(), now_ms).await {
            return true;
        }
    }
    false
}

async fn mtime_within_window(path: &Path, now_ms: i64) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else { return false };
    let Ok(modified) = meta.modified() else { return false };
    let Ok(duration) = modified.duration_since(std::time::UNIX_EPOCH) else { return false };
    let mtime_ms = duration.as_millis() as i64;
    (now_ms - mtime_ms).abs() <= ACTIVITY_WINDOW_MS
}

/// Derive an agent's status from the three probe signals (spec §3
/// invariant: process or session present -> running; else recent
/// activity -> idle; else stopped).
pub fn derive_status(process_present: bool, session_present: bool, recent_activity: bool) -> AgentStatus {
    if process_present || session_present {
        AgentStatus::Running
    } else if recent_activity {
        AgentStatus::Idle
    } else {
        AgentStatus::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_invariant_matches_spec_table() {
        assert_eq!(derive_status(true, false, false), AgentStatus::Running);
        assert_eq!(derive_status(false, true, false), AgentStatus::Running);
        assert_eq!(derive_status(false, false, true), AgentStatus::Idle);
        assert_eq!(derive_status(false, false, false), AgentStatus::Stopped);
    }

    #[tokio::test]
    async fn recent_activity_false_for_missing_directory() {
        let missing = Path::new("/nonexistent/rigwatch/agent/dir");
        assert!(!recent_activity(missing, crate::now_ms()).await);
    }

    #[tokio::test]
    async fn recent_activity_true_for_freshly_written_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(dir.path().join(".events.jsonl"), b"{}").await.expect("write");
        assert!(recent_activity(dir.path(), crate::now_ms()).await);
    }

    #[tokio::test]
    async fn recent_activity_false_for_stale_mail() {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::create_dir(dir.path().join("mail")).await.expect("mkdir");
        tokio::fs::write(dir.path().join("mail").join("m1"), b"hi").await.expect("write");
        // Pretend "now" is far in the future relative to the file's mtime.
        let far_future = crate::now_ms() + 10 * ACTIVITY_WINDOW_MS;
        assert!(!recent_activity(dir.path(), far_future).await);
    }
}
