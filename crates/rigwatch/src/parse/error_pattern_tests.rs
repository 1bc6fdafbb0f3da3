// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::error_pattern::*;

#[test]
fn normalizes_path() {
    assert_eq!(normalize("open /var/log/rigwatch/alpha.log failed"), "open <path> failed");
}

#[test]
fn normalizes_numbers_and_timestamps() {
    let normalized = normalize("retry 12345 at 2026-01-02T03:04:05Z after 00:10:42");
    assert_eq!(normalized, "retry <num> at <timestamp> after <time>");
}

#[test]
fn normalizes_ipv4_and_port() {
    assert_eq!(normalize("connect to 10.0.0.5:8080 refused"), "connect to <ip>:<port> refused");
}

#[test]
fn normalizes_agent_path_fragments() {
    assert_eq!(normalize("agent crew/worker-3 timed out"), "agent <agent> timed out");
}

#[test]
fn hex_before_uuid_quirk_still_tags_a_token() {
    let normalized = normalize("bead 123e4567-e89b-12d3-a456-426614174000 stuck");
    assert!(
        normalized.contains("<id>") || normalized.contains("<uuid>"),
        "expected a normalization token, got: {normalized}"
    );
}

#[test]
fn collapses_whitespace() {
    assert_eq!(normalize("too    many\n\tspaces"), "too many spaces");
}

#[test]
fn truncates_long_messages() {
    let long = "x".repeat(250);
    let normalized = normalize(&long);
    assert!(normalized.ends_with("..."));
    assert_eq!(normalized.chars().count(), 203);
}

#[test]
fn jaccard_identical_strings_is_one() {
    assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
}

#[test]
fn jaccard_disjoint_strings_is_zero() {
    assert_eq!(jaccard_similarity("a b c", "x y z"), 0.0);
}

#[test]
fn jaccard_partial_overlap() {
    let sim = jaccard_similarity("a b c", "a b d");
    assert!((sim - 0.5).abs() < f64::EPSILON);
}

#[test]
fn jaccard_both_empty_is_one() {
    assert_eq!(jaccard_similarity("", ""), 1.0);
}
