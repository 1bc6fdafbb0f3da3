// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::log::*;
use crate::model::LogLevel;

#[test]
fn parses_bracketed_form() {
    let parsed = parse_log_line("[2026-01-02T03:04:05Z] [warn] disk nearly full");
    assert_eq!(parsed.level, LogLevel::Warn);
    assert_eq!(parsed.message, "disk nearly full");
    assert!(parsed.timestamp.is_some());
}

#[test]
fn parses_iso_prefixed_form() {
    let parsed = parse_log_line("2026-01-02T03:04:05Z connection failed");
    assert_eq!(parsed.level, LogLevel::Error);
    assert_eq!(parsed.message, "connection failed");
}

#[test]
fn falls_back_to_keyword_scan() {
    assert_eq!(parse_log_line("something went wrong, error: boom").level, LogLevel::Error);
    assert_eq!(parse_log_line("warning: low disk space").level, LogLevel::Warn);
    assert_eq!(parse_log_line("debug: entering loop").level, LogLevel::Debug);
    assert_eq!(parse_log_line("all systems nominal").level, LogLevel::Info);
}

#[test]
fn never_panics_on_garbage() {
    for input in ["", "[", "[only one bracket", "]]]][[[[", "\u{0}\u{0}"] {
        let _ = parse_log_line(input);
    }
}
