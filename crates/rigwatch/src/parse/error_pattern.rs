// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::LazyLock;

use regex::Regex;

const MAX_LEN: usize = 200;

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/[\w./-]*\w").unwrap());
static HEX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{8,}\b").unwrap());
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
        .unwrap()
});
static NUM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{4,}\b").unwrap());
static ISO_TS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?").unwrap()
});
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{2}:\d{2}:\d{2}\b").unwrap());
static IPV4_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap());
static PORT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\d{2,5}\b").unwrap());
static AGENT_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:polecats?|crew|witness|refinery|mayor)/[\w-]+\b").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Normalize a log/error message into a clustering key.
///
/// Substitution order matters (spec §4.1, and Open Questions §9): paths,
/// then hex, then UUID-like, then numbers, then ISO timestamps, then
/// `HH:MM:SS`, then IPv4, then ports, then agent path fragments, then
/// whitespace collapse, then a 200-char truncation.
///
/// Hex runs before UUID on purpose — a UUID is itself a run of 32 hex
/// digits split by dashes, so the generic hex pass typically claims the
/// dash-separated groups first and UUIDs end up normalized to `<id>`
/// rather than `<uuid>`. This mirrors a known quirk in the reference
/// implementation that spec.md preserves rather than "fixes"; callers
/// (and the tests in §8) accept either token.
pub fn normalize(message: &str) -> String {
    let mut s = message.to_owned();
    s = PATH_RE.replace_all(&s, "<path>").into_owned();
    s = HEX_RE.replace_all(&s, "<id>").into_owned();
    s = UUID_RE.replace_all(&s, "<uuid>").into_owned();
    s = NUM_RE.replace_all(&s, "<num>").into_owned();
    s = ISO_TS_RE.replace_all(&s, "<timestamp>").into_owned();
    s = TIME_RE.replace_all(&s, "<time>").into_owned();
    s = IPV4_RE.replace_all(&s, "<ip>").into_owned();
    s = PORT_RE.replace_all(&s, ":<port>").into_owned();
    s = AGENT_PATH_RE.replace_all(&s, "<agent>").into_owned();
    s = WHITESPACE_RE.replace_all(&s, " ").into_owned();
    let s = s.trim().to_owned();

    if s.chars().count() > MAX_LEN {
        let truncated: String = s.chars().take(MAX_LEN).collect();
        format!("{truncated}...")
    } else {
        s
    }
}

/// Jaccard token similarity between two normalized pattern strings, used by
/// the error-pattern analyzer's online clustering (spec §4.5.4).
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
