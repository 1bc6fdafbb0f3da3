// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for mapping a filesystem path under `GT_DIR` back to the
//! `(rig, agent)` it belongs to (spec §6 "Filesystem layout consumed").

use std::path::Path;

/// Path components relative to `gt_dir`, or empty if `path` isn't under it.
pub fn relative_components(gt_dir: &Path, path: &Path) -> Vec<String> {
    path.strip_prefix(gt_dir)
        .ok()
        .map(|p| p.components().filter_map(|c| c.as_os_str().to_str().map(str::to_owned)).collect())
        .unwrap_or_default()
}

/// `(rig, agent)` for a path whose components contain a `mail` directory
/// segment. The component immediately preceding `mail` is always the
/// agent's own directory — for `mayor`/`witness`/`refinery` that directory
/// *is* the agent; for `crew/<name>` and `polecats/<name>` it's the
/// instance name.
pub fn rig_and_agent_for_mail(gt_dir: &Path, path: &Path) -> Option<(String, String)> {
    let parts = relative_components(gt_dir, path);
    let rig = parts.first()?.clone();
    let mail_idx = parts.iter().position(|p| p == "mail")?;
    let agent = parts.get(mail_idx.checked_sub(1)?)?.clone();
    Some((rig, agent))
}

/// `(rig, agent)` for an arbitrary per-agent file (e.g. a `*.log` file
/// living directly inside an agent's directory, not nested under `mail/`).
pub fn rig_and_agent_for_file(gt_dir: &Path, path: &Path) -> Option<(String, Option<String>)> {
    let parts = relative_components(gt_dir, path);
    let rig = parts.first()?.clone();
    if parts.len() < 3 {
        return Some((rig, None));
    }
    let agent = match parts[1].as_str() {
        "mayor" | "witness" | "refinery" => Some(parts[1].clone()),
        "crew" | "polecats" => parts.get(2).cloned(),
        _ => None,
    };
    Some((rig, agent))
}
