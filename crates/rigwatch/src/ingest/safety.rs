// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-injection-prevention whitelist (spec §4.4.1, §5): any identifier
//! forwarded to a subprocess argv is checked here first. No string is ever
//! interpolated into a shell command; only argv-style invocation is used.

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static PATH_SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-/]+$").unwrap());

/// `^[A-Za-z0-9_-]+$` — rig names, agent names.
pub fn is_safe_identifier(s: &str) -> bool {
    !s.is_empty() && IDENTIFIER_RE.is_match(s)
}

/// `^[A-Za-z0-9_\-./]+$` — path-shaped arguments.
pub fn is_safe_path_segment(s: &str) -> bool {
    !s.is_empty() && PATH_SEGMENT_RE.is_match(s)
}

#[cfg(test)]
mod safety_tests;
