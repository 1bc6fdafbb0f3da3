// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The poll-and-watch ingestion pipeline (spec §4.4): a periodic poller over
//! the `gt`/`bd` CLI, a filesystem watcher for append-only JSONL files, and a
//! byte-offset log tailer.

pub mod file_watcher;
pub mod logs_watcher;
mod pathutil;
pub mod poller;
pub mod probe;
pub mod safety;
