// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::model::Hook;

/// Parse `gt hook [--json]` output for one agent. Recognizes `Hook Status:`,
/// `Role:`, `AUTONOMOUS MODE`, `Hooked: <id>: <title>`, `Molecule: <id>`,
/// `Attached: <ts>`. Returns `None` if the agent has no hooked work.
///
/// Open question (spec §9): some call-sites admit the trailing colon of
/// `Hooked: gt-abc:` into the bead id. This parser always strips it, making
/// the behavior uniform across call-sites as the spec directs.
pub fn parse_hook_output(output: &str, rig: &str, agent: &str) -> Option<Hook> {
    if output.trim().is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(output.trim()) {
        return hook_from_json(&value, rig, agent);
    }

    let mut bead = None;
    let mut title = None;
    let mut molecule = None;
    let mut attached_at = None;
    let mut autonomous_mode = false;
    let mut saw_hook_status = false;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Hook Status:") {
            saw_hook_status = true;
        } else if trimmed.contains("AUTONOMOUS MODE") {
            autonomous_mode = true;
        } else if let Some(rest) = trimmed.strip_prefix("Hooked:") {
            let rest = rest.trim();
            if let Some((id, rest_title)) = rest.split_once(':') {
                bead = Some(id.trim().trim_end_matches(':').to_owned());
                title = Some(rest_title.trim().to_owned());
            } else {
                bead = Some(rest.trim_end_matches(':').to_owned());
            }
        } else if let Some(rest) = trimmed.strip_prefix("Molecule:") {
            molecule = Some(rest.trim().to_owned());
        } else if let Some(rest) = trimmed.strip_prefix("Attached:") {
            attached_at = parse_timestamp(rest.trim());
        }
    }

    if bead.is_none() && !saw_hook_status && !autonomous_mode {
        return None;
    }

    Some(Hook {
        rig: rig.to_owned(),
        agent: agent.to_owned(),
        bead,
        title,
        molecule,
        autonomous_mode,
        attached_at,
    })
}

fn hook_from_json(v: &serde_json::Value, rig: &str, agent: &str) -> Option<Hook> {
    let bead = v.get("bead").and_then(|x| x.as_str()).map(|s| s.trim_end_matches(':').to_owned());
    Some(Hook {
        rig: rig.to_owned(),
        agent: agent.to_owned(),
        bead,
        title: v.get("title").and_then(|x| x.as_str()).map(String::from),
        molecule: v.get("molecule").and_then(|x| x.as_str()).map(String::from),
        autonomous_mode: v.get("autonomousMode").and_then(|x| x.as_bool()).unwrap_or(false),
        attached_at: v.get("attachedAt").and_then(|x| x.as_i64()),
    })
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.timestamp_millis())
}
