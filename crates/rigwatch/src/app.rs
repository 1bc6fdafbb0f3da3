// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state handed to every HTTP and WebSocket handler —
//! the single `Arc` threaded through `axum::State`.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::alerting::AlertingEngine;
use crate::anomaly::AnomalyDetector;
use crate::bus::Bus;
use crate::config::Config;
use crate::error_patterns::ErrorPatternAnalyzer;
use crate::forecaster::Forecaster;
use crate::health::HealthHistory;
use crate::historical::HistoricalStore;
use crate::metrics::MetricsCollector;
use crate::state::StateManager;

pub struct AppState {
    pub config: Config,
    pub bus: Arc<Bus>,
    pub state: Arc<StateManager>,
    pub metrics: Arc<RwLock<MetricsCollector>>,
    pub health_history: Arc<RwLock<HealthHistory>>,
    pub anomaly: Arc<RwLock<AnomalyDetector>>,
    pub error_patterns: Arc<RwLock<ErrorPatternAnalyzer>>,
    pub historical: Arc<HistoricalStore>,
    pub forecaster: Arc<Forecaster>,
    pub alerting: Arc<AlertingEngine>,
    pub shutdown: CancellationToken,
}
