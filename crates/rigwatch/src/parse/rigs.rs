// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use crate::model::{Rig, RigStatus};

/// Parse `gt rig list [--json]` output into a name-keyed map.
///
/// Accepts either a JSON map (`{"name": {...}}`) or the textual fallback:
/// rig names are lines starting with exactly two spaces and an identifier,
/// followed by metadata lines containing `Polecats: N | Crew: M` and
/// `Agents: [w x y]`. Unrecognized input yields an empty map.
pub fn parse_rig_list(output: &str) -> HashMap<String, Rig> {
    if let Ok(rigs) = parse_rig_list_json(output) {
        return rigs;
    }
    parse_rig_list_text(output)
}

fn parse_rig_list_json(output: &str) -> Result<HashMap<String, Rig>, ()> {
    let value: serde_json::Value = serde_json::from_str(output.trim()).map_err(|_| ())?;
    let map = value.as_object().ok_or(())?;
    let mut rigs = HashMap::new();
    for (name, v) in map {
        let polecats = v.get("polecats").and_then(|x| x.as_u64()).unwrap_or(0) as u32;
        let crew = v.get("crew").and_then(|x| x.as_u64()).unwrap_or(0) as u32;
        let agents = v
            .get("agents")
            .and_then(|x| x.as_array())
            .map(|arr| arr.iter().filter_map(|a| a.as_str().map(String::from)).collect())
            .unwrap_or_default();
        rigs.insert(
            name.clone(),
            Rig { name: name.clone(), polecats, crew, agents, status: RigStatus::Unknown },
        );
    }
    Ok(rigs)
}

fn parse_rig_list_text(output: &str) -> HashMap<String, Rig> {
    let mut rigs = HashMap::new();
    let mut current: Option<Rig> = None;

    for line in output.lines() {
        if line.starts_with("  ") && !line.starts_with("   ") {
            let name = line.trim().split_whitespace().next().unwrap_or("").to_owned();
            if name.is_empty() {
                continue;
            }
            if let Some(rig) = current.take() {
                rigs.insert(rig.name.clone(), rig);
            }
            current = Some(Rig { name, polecats: 0, crew: 0, agents: vec![], status: RigStatus::Unknown });
            continue;
        }

        let Some(rig) = current.as_mut() else { continue };

        if let Some(pc_pos) = line.find("Polecats:") {
            let rest = &line[pc_pos + "Polecats:".len()..];
            if let Some(n) = rest.trim().split_whitespace().next() {
                rig.polecats = n.parse().unwrap_or(0);
            }
        }
        if let Some(crew_pos) = line.find("Crew:") {
            let rest = &line[crew_pos + "Crew:".len()..];
            if let Some(n) = rest.trim().split_whitespace().next() {
                rig.crew = n.trim_matches(|c: char| !c.is_ascii_digit()).parse().unwrap_or(0);
            }
        }
        if let Some(agents_pos) = line.find("Agents:") {
            let rest = &line[agents_pos + "Agents:".len()..];
            let inner = rest.trim().trim_start_matches('[').trim_end_matches(']');
            rig.agents = inner.split_whitespace().map(|s| s.to_owned()).collect();
        }
    }
    if let Some(rig) = current.take() {
        rigs.insert(rig.name.clone(), rig);
    }
    rigs
}
