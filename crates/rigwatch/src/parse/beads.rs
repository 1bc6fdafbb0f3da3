// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::model::{Bead, BeadPriority, BeadStatus};

/// Parse `bd list [--json]` / `bd show <id> [--json]` output into beads.
/// Tries JSON first, falls back to [`parse_beads_text`].
pub fn parse_beads(output: &str) -> Vec<Bead> {
    if let Ok(beads) = parse_beads_json(output) {
        return beads;
    }
    parse_beads_text(output)
}

fn parse_beads_json(output: &str) -> Result<Vec<Bead>, ()> {
    let value: serde_json::Value = serde_json::from_str(output.trim()).map_err(|_| ())?;
    let items: Vec<&serde_json::Value> = match &value {
        serde_json::Value::Array(a) => a.iter().collect(),
        serde_json::Value::Object(_) => vec![&value],
        _ => return Err(()),
    };
    Ok(items.into_iter().filter_map(bead_from_json).collect())
}

fn bead_from_json(v: &serde_json::Value) -> Option<Bead> {
    let id = v.get("id")?.as_str()?.to_owned();
    let rig = v.get("rig").and_then(|x| x.as_str()).unwrap_or("").to_owned();
    let title = v.get("title").and_then(|x| x.as_str()).unwrap_or("").to_owned();
    let status = normalize_status(v.get("status").and_then(|x| x.as_str()).unwrap_or("open"))?;
    let priority = v.get("priority").and_then(|x| x.as_str()).and_then(normalize_priority);
    let labels = v
        .get("labels")
        .and_then(|x| x.as_array())
        .map(|a| a.iter().filter_map(|s| s.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let depends_on = v
        .get("dependsOn")
        .or_else(|| v.get("depends_on"))
        .and_then(|x| x.as_array())
        .map(|a| a.iter().filter_map(|s| s.as_str().map(String::from)).collect())
        .unwrap_or_default();

    Some(Bead {
        id,
        rig,
        title,
        status,
        priority,
        labels,
        owner: v.get("owner").and_then(|x| x.as_str()).map(String::from),
        assignee: v.get("assignee").and_then(|x| x.as_str()).map(String::from),
        bead_type: v.get("type").and_then(|x| x.as_str()).map(String::from),
        description: v.get("description").and_then(|x| x.as_str()).unwrap_or("").to_owned(),
        depends_on,
        created_at: v.get("createdAt").and_then(|x| x.as_i64()),
        updated_at: v.get("updatedAt").and_then(|x| x.as_i64()),
        closed_at: v.get("closedAt").and_then(|x| x.as_i64()),
    })
}

/// Leading-symbol textual format, one bead per line:
/// `<symbol> <id> [P#|priority] <title>`
pub fn parse_beads_text(output: &str) -> Vec<Bead> {
    output.lines().filter_map(parse_bead_line).collect()
}

fn parse_bead_line(line: &str) -> Option<Bead> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut chars = trimmed.chars();
    let symbol = chars.next()?;
    let status = status_from_symbol(symbol)?;
    let rest = chars.as_str().trim_start();

    let mut parts = rest.splitn(2, char::is_whitespace);
    let id = parts.next()?.trim_end_matches(':').to_owned();
    let remainder = parts.next().unwrap_or("").trim();

    let (priority, title) = extract_priority(remainder);

    Some(Bead {
        id,
        rig: String::new(),
        title: title.to_owned(),
        status,
        priority,
        labels: vec![],
        owner: None,
        assignee: None,
        bead_type: None,
        description: String::new(),
        depends_on: vec![],
        created_at: None,
        updated_at: None,
        closed_at: None,
    })
}

fn extract_priority(remainder: &str) -> (Option<BeadPriority>, &str) {
    let mut words = remainder.splitn(2, char::is_whitespace);
    let Some(first) = words.next() else { return (None, remainder) };
    match normalize_priority(first) {
        Some(p) => (Some(p), words.next().unwrap_or("").trim()),
        None => (None, remainder),
    }
}

fn status_from_symbol(symbol: char) -> Option<BeadStatus> {
    match symbol {
        '?' | '○' => Some(BeadStatus::Open),
        '●' => Some(BeadStatus::Hooked),
        '✓' => Some(BeadStatus::Done),
        '✗' => Some(BeadStatus::Closed),
        _ => None,
    }
}

fn symbol_for_status(status: BeadStatus) -> char {
    match status {
        BeadStatus::Open => '○',
        BeadStatus::Hooked => '●',
        BeadStatus::InProgress => '●',
        BeadStatus::Done => '✓',
        BeadStatus::Closed => '✗',
    }
}

fn normalize_status(raw: &str) -> Option<BeadStatus> {
    match raw.to_ascii_lowercase().as_str() {
        "open" => Some(BeadStatus::Open),
        "hooked" => Some(BeadStatus::Hooked),
        "in_progress" | "in-progress" | "inprogress" => Some(BeadStatus::InProgress),
        "done" => Some(BeadStatus::Done),
        "closed" => Some(BeadStatus::Closed),
        _ => None,
    }
}

fn normalize_priority(raw: &str) -> Option<BeadPriority> {
    match raw.to_ascii_lowercase().as_str() {
        "p1" | "critical" => Some(BeadPriority::Critical),
        "p2" | "high" => Some(BeadPriority::High),
        "p3" | "normal" => Some(BeadPriority::Normal),
        "p4" | "low" => Some(BeadPriority::Low),
        _ => None,
    }
}

/// Render a bead back into the textual fallback format. Used only to
/// exercise the parser's round-trip idempotence invariant (spec §8.5) —
/// `bd` itself owns the real rendering, this is not a wire format we emit.
pub fn render_bead_text(bead: &Bead) -> String {
    let symbol = symbol_for_status(bead.status);
    let priority = bead.priority.map(|p| format!(" {}", p.as_str())).unwrap_or_default();
    format!("{symbol} {}{priority} {}", bead.id, bead.title)
}

/// Parse a single bead's detail view: description is a multi-line block
/// delimited by uppercase section headers; dependencies come from indented
/// `→ ○|● id:` lines.
pub fn parse_bead_details(output: &str, rig: &str) -> Option<Bead> {
    let mut lines = output.lines();
    let header = lines.next()?;
    let mut bead = parse_bead_line(header)?;
    bead.rig = rig.to_owned();

    let mut description_lines: Vec<&str> = vec![];
    let mut in_description = false;
    let mut depends_on = vec![];

    for line in lines {
        let trimmed = line.trim();
        if is_section_header(trimmed) {
            in_description = trimmed.eq_ignore_ascii_case("DESCRIPTION") || trimmed.starts_with("DESCRIPTION:");
            continue;
        }
        if let Some(dep_id) = parse_dependency_line(line) {
            depends_on.push(dep_id);
            continue;
        }
        if in_description && !trimmed.is_empty() {
            description_lines.push(trimmed);
        }
    }

    bead.description = description_lines.join("\n");
    bead.depends_on = depends_on;
    Some(bead)
}

fn is_section_header(line: &str) -> bool {
    !line.is_empty()
        && line.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase())
        && line.chars().any(|c| c.is_alphabetic())
}

fn parse_dependency_line(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix('\u{2192}')?.trim_start(); // "→"
    let rest = rest.strip_prefix('○').or_else(|| rest.strip_prefix('●'))?.trim_start();
    let id = rest.split(':').next()?.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_owned())
    }
}
