// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::model::LogLevel;

/// One parsed log line: timestamp in epoch millis (best-effort; `None` if
/// absent), level, and message body.
pub struct ParsedLogLine {
    pub timestamp: Option<i64>,
    pub level: LogLevel,
    pub message: String,
}

/// Try `[ts] [level] message`, then ISO-prefixed `YYYY-MM-DDThh:mm:ssZ message`,
/// then a keyword-scan fallback. Never fails — worst case, the whole line
/// becomes the message at `info` level.
pub fn parse_log_line(line: &str) -> ParsedLogLine {
    if let Some(parsed) = parse_bracketed(line) {
        return parsed;
    }
    if let Some(parsed) = parse_iso_prefixed(line) {
        return parsed;
    }
    ParsedLogLine { timestamp: None, level: infer_level(line), message: line.trim().to_owned() }
}

fn parse_bracketed(line: &str) -> Option<ParsedLogLine> {
    let rest = line.trim().strip_prefix('[')?;
    let (ts_raw, rest) = rest.split_once(']')?;
    let rest = rest.trim_start().strip_prefix('[')?;
    let (level_raw, rest) = rest.split_once(']')?;

    let timestamp = parse_timestamp(ts_raw.trim());
    let level = level_from_str(level_raw.trim()).unwrap_or_else(|| infer_level(rest));
    Some(ParsedLogLine { timestamp, level, message: rest.trim().to_owned() })
}

fn parse_iso_prefixed(line: &str) -> Option<ParsedLogLine> {
    let trimmed = line.trim();
    let (ts_raw, rest) = trimmed.split_once(' ')?;
    let timestamp = parse_timestamp(ts_raw)?;
    Some(ParsedLogLine { timestamp: Some(timestamp), level: infer_level(rest), message: rest.trim().to_owned() })
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.timestamp_millis())
}

fn level_from_str(raw: &str) -> Option<LogLevel> {
    match raw.to_ascii_lowercase().as_str() {
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" | "err" => Some(LogLevel::Error),
        _ => None,
    }
}

/// Keyword-scan fallback: `error|fail -> error; warn -> warn; debug -> debug;
/// else info`.
fn infer_level(text: &str) -> LogLevel {
    let lower = text.to_ascii_lowercase();
    if lower.contains("error") || lower.contains("fail") {
        LogLevel::Error
    } else if lower.contains("warn") {
        LogLevel::Warn
    } else if lower.contains("debug") {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}
