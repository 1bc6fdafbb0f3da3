// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Real-time observability service for a fleet of autonomous coding agents
//! (spec §1-2): the poll-and-watch ingestion pipeline, the state manager and
//! event bus, derived metrics/health/anomaly/alerting signals, the push-
//! channel fan-out layer, and the HTTP read API all wire together here.

pub mod alerting;
pub mod anomaly;
pub mod app;
pub mod bus;
pub mod config;
pub mod error;
pub mod error_patterns;
pub mod event_buffer;
pub mod fanout;
pub mod forecaster;
pub mod health;
pub mod historical;
pub mod http;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod signals;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::alerting::AlertingEngine;
use crate::anomaly::AnomalyDetector;
use crate::app::AppState;
use crate::bus::{Bus, Message};
use crate::config::{Command, Config};
use crate::error_patterns::ErrorPatternAnalyzer;
use crate::forecaster::Forecaster;
use crate::health::HealthHistory;
use crate::historical::HistoricalStore;
use crate::ingest::file_watcher::FileWatcher;
use crate::ingest::logs_watcher::LogsWatcher;
use crate::ingest::poller::Poller;
use crate::metrics::MetricsCollector;
use crate::signals::SignalsEngine;
use crate::state::StateManager;

/// Current time in epoch milliseconds. The one place this service calls
/// `SystemTime::now()` — every other component takes `now` as a parameter so
/// it stays deterministic under test.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

const METRICS_HISTORY_SIZE: usize = 60;

/// Build every subsystem, start the background loops, serve the HTTP/push
/// API, and run until a termination signal arrives (spec §4.9).
pub async fn run(config: Config) -> anyhow::Result<()> {
    if matches!(config.command, Some(Command::Watch)) {
        tracing::info!("watch-only mode requested; the ingestion pipeline still runs under the same lifecycle, HTTP included");
    }

    let shutdown = CancellationToken::new();
    let now = now_ms();

    let bus = Arc::new(Bus::new());
    let state = Arc::new(StateManager::new(
        Arc::clone(&bus),
        config.event_buffer_max_age_ms as i64,
        config.event_buffer_max_events,
    ));
    if config.state_snapshot_path.exists() {
        if let Err(e) = state.restore_snapshot(&config.state_snapshot_path).await {
            tracing::warn!(err = %e, "failed to restore state snapshot, starting clean");
        }
    }

    let metrics = Arc::new(RwLock::new(MetricsCollector::new(METRICS_HISTORY_SIZE, now)));
    let health_history = Arc::new(RwLock::new(HealthHistory::new()));
    let anomaly = Arc::new(RwLock::new(AnomalyDetector::new(config.alert_cooldown_ms as i64)));
    let error_patterns = Arc::new(RwLock::new(ErrorPatternAnalyzer::new()));

    let historical = Arc::new(HistoricalStore::new(config.historical_store_path.clone()));
    if let Err(e) = historical.load().await {
        tracing::warn!(err = %e, "failed to load historical store, starting clean");
    }

    let forecaster = Arc::new(Forecaster::new(Arc::clone(&state), Arc::clone(&bus)));

    let alerting = Arc::new(AlertingEngine::new(config.rules_path.clone(), Arc::clone(&bus)));
    if let Err(e) = alerting.load().await {
        tracing::warn!(err = %e, "failed to load alerting rules");
    }

    let app_state = Arc::new(AppState {
        config: config.clone(),
        bus: Arc::clone(&bus),
        state: Arc::clone(&state),
        metrics: Arc::clone(&metrics),
        health_history: Arc::clone(&health_history),
        anomaly: Arc::clone(&anomaly),
        error_patterns: Arc::clone(&error_patterns),
        historical: Arc::clone(&historical),
        forecaster: Arc::clone(&forecaster),
        alerting: Arc::clone(&alerting),
        shutdown: shutdown.clone(),
    });

    let gt_dir = config.gt_dir();

    let poller = Arc::new(Poller::new(gt_dir.clone(), config.poll_interval(), Arc::clone(&state), Arc::clone(&metrics)));
    let file_watcher = Arc::new(FileWatcher::new(gt_dir.clone(), Arc::clone(&state)));
    let logs_watcher = Arc::new(LogsWatcher::new(gt_dir.clone(), Arc::clone(&state)));
    let signals = Arc::new(SignalsEngine::new(
        Arc::clone(&state),
        Arc::clone(&bus),
        Arc::clone(&metrics),
        Arc::clone(&health_history),
        Arc::clone(&anomaly),
        Arc::clone(&error_patterns),
        Arc::clone(&historical),
    ));

    let mut tasks = Vec::new();

    {
        let poller = Arc::clone(&poller);
        let sd = shutdown.clone();
        tasks.push(tokio::spawn(async move { poller.run(sd).await }));
    }
    {
        let file_watcher = Arc::clone(&file_watcher);
        let sd = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = file_watcher.run(sd).await {
                tracing::warn!(err = %e, "file watcher stopped with an error");
            }
        }));
    }
    {
        let logs_watcher = Arc::clone(&logs_watcher);
        let sd = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = logs_watcher.run(sd).await {
                tracing::warn!(err = %e, "logs watcher stopped with an error");
            }
        }));
    }
    {
        let signals = Arc::clone(&signals);
        let sd = shutdown.clone();
        let tick = config.metrics_broadcast_interval();
        tasks.push(tokio::spawn(async move { signals.run(tick, sd).await }));
    }
    {
        let forecaster = Arc::clone(&forecaster);
        let sd = shutdown.clone();
        tasks.push(tokio::spawn(async move { forecaster.run(sd).await }));
    }
    {
        let alerting = Arc::clone(&alerting);
        let state = Arc::clone(&state);
        let sd = shutdown.clone();
        tasks.push(tokio::spawn(async move { alerting.run(state, sd).await }));
    }
    {
        let historical = Arc::clone(&historical);
        let sd = shutdown.clone();
        tasks.push(tokio::spawn(async move { historical.run(sd).await }));
    }

    spawn_signal_handler(shutdown.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(err = %e, addr = %addr, "failed to bind listener");
        e
    })?;
    tracing::info!(addr = %addr, gt_dir = %gt_dir.display(), "rigwatch listening");

    let router = http::build_router(Arc::clone(&app_state));
    let serve_shutdown = shutdown.clone();
    axum::serve(listener, router).with_graceful_shutdown(async move { serve_shutdown.cancelled().await }).await?;

    // The listener is closed; make sure every loop has observed cancellation,
    // broadcast `shutdown` to any push connections still draining, then
    // flush persistent state (spec §4.9).
    shutdown.cancel();
    bus.publish(Message::Shutdown { timestamp: bus.next_timestamp() });

    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
            tracing::warn!("subsystem did not stop within the shutdown deadline");
        }
    }

    if let Err(e) = state.save_snapshot(&config.state_snapshot_path).await {
        tracing::error!(err = %e, "failed to persist state snapshot on shutdown");
    }
    if let Err(e) = historical.save().await {
        tracing::error!(err = %e, "failed to flush historical store on shutdown");
    }
    if let Err(e) = alerting.save().await {
        tracing::error!(err = %e, "failed to persist alerting rules on shutdown");
    }

    Ok(())
}

/// First SIGTERM/SIGINT triggers graceful shutdown; a second forces exit.
/// Mirrors the teacher's session-loop signal handler.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => tracing::info!("received SIGTERM"),
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => tracing::info!("received SIGINT"),
        }
        shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => tracing::info!("received SIGTERM again, forcing exit"),
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => tracing::info!("received SIGINT again, forcing exit"),
        }
        std::process::exit(130);
    });
}
