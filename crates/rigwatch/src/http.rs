// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP read API (spec §6). Every handler reads through `AppState`'s shared
//! collectors — none owns data of its own. Router wiring mirrors the
//! teacher's `transport/mod.rs`: one `Router::new()` chain, CORS layered on
//! top, `with_state` last. No auth layer — the read API carries none.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::alerting::{Action, Condition, Rule, RuleStats};
use crate::anomaly::{Alert, Thresholds};
use crate::app::AppState;
use crate::error::{AppError, ErrorResponse};
use crate::event_buffer::{BufferedEvent, ReplayState};
use crate::historical::{AgentEfficiency, Interval, PeriodSummary, QuerySeries, StorageStats};
use crate::model::{Hook, RigMap};

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/rigs", get(get_rigs))
        .route("/api/hooks", get(get_hooks))
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/history", get(get_alert_history))
        .route("/api/alerts/thresholds", get(get_thresholds).put(put_thresholds))
        .route("/api/alerts/{id}/acknowledge", post(acknowledge_alert))
        .route("/api/alerts/{id}/resolve", post(resolve_alert))
        .route("/api/alerts/{id}", axum::routing::delete(dismiss_alert))
        .route("/api/rules", get(list_rules).post(create_rule))
        .route("/api/rules/test", post(test_rule))
        .route("/api/rules/{id}", axum::routing::put(update_rule).delete(delete_rule))
        .route("/api/rules/{id}/toggle", post(toggle_rule))
        .route("/api/rules/{id}/stats", get(rule_stats))
        .route("/api/events/export", get(export_events))
        .route("/api/metrics/history", get(metrics_history))
        .route("/api/metrics/summary", get(metrics_summary))
        .route("/api/metrics/agents", get(metrics_agents))
        .route("/api/metrics/storage", get(metrics_storage))
        .route("/api/forecast", get(get_forecast))
        .route("/api/timeline", get(timeline_overview))
        .route("/api/timeline/state/{timestamp}", get(timeline_state))
        .route("/api/timeline/events", get(timeline_events))
        .route("/api/timeline/events/all", get(timeline_events_all))
        .route("/ws", get(crate::fanout::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// -- state / rigs / hooks ----------------------------------------------------

/// GET /api/state
async fn get_state(State(app): State<Arc<AppState>>) -> Json<crate::state::StateSnapshot> {
    Json(app.state.snapshot().await)
}

/// GET /api/rigs
async fn get_rigs(State(app): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(app.state.rig_names().await)
}

/// GET /api/hooks
async fn get_hooks(State(app): State<Arc<AppState>>) -> Json<RigMap<std::collections::HashMap<String, Hook>>> {
    Json(app.state.hooks_snapshot().await)
}

// -- alerts -------------------------------------------------------------------

/// GET /api/alerts
async fn list_alerts(State(app): State<Arc<AppState>>) -> Json<Vec<Alert>> {
    Json(app.anomaly.read().await.active_alerts().to_vec())
}

/// GET /api/alerts/history
async fn get_alert_history(State(app): State<Arc<AppState>>) -> Json<Vec<Alert>> {
    Json(app.anomaly.read().await.history().to_vec())
}

/// GET /api/alerts/thresholds
async fn get_thresholds(State(app): State<Arc<AppState>>) -> Json<Thresholds> {
    Json(app.anomaly.read().await.thresholds())
}

/// PUT /api/alerts/thresholds
async fn put_thresholds(State(app): State<Arc<AppState>>, Json(thresholds): Json<Thresholds>) -> Json<Thresholds> {
    app.anomaly.write().await.set_thresholds(thresholds);
    Json(app.anomaly.read().await.thresholds())
}

/// POST /api/alerts/:id/acknowledge
async fn acknowledge_alert(State(app): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    let now = crate::now_ms();
    let mut anomaly = app.anomaly.write().await;
    if !anomaly.acknowledge(&id, now) {
        return Err(AppError::NotFound.to_http_response(format!("alert {id} not found")));
    }
    let updated = anomaly.active_alerts().iter().find(|a| a.id == id).cloned();
    drop(anomaly);
    publish_alert_updated(&app, updated);
    Ok(Json(json!({"acknowledged": true})))
}

/// POST /api/alerts/:id/resolve
async fn resolve_alert(State(app): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    let now = crate::now_ms();
    let mut anomaly = app.anomaly.write().await;
    if !anomaly.resolve(&id, now) {
        return Err(AppError::NotFound.to_http_response(format!("alert {id} not found")));
    }
    let updated = anomaly.active_alerts().iter().find(|a| a.id == id).cloned();
    drop(anomaly);
    publish_alert_updated(&app, updated);
    Ok(Json(json!({"resolved": true})))
}

/// DELETE /api/alerts/:id
async fn dismiss_alert(State(app): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    if !app.anomaly.write().await.dismiss(&id) {
        return Err(AppError::NotFound.to_http_response(format!("alert {id} not found")));
    }
    app.bus.publish(crate::bus::Message::AlertDismissed {
        timestamp: app.bus.next_timestamp(),
        data: json!({"id": id}),
    });
    Ok(Json(json!({"dismissed": true})))
}

fn publish_alert_updated(app: &AppState, alert: Option<Alert>) {
    let Some(alert) = alert else { return };
    let data = serde_json::to_value(&alert).unwrap_or(serde_json::Value::Null);
    app.bus.publish(crate::bus::Message::AlertUpdated { timestamp: app.bus.next_timestamp(), data });
}

// -- rules ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NewRule {
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_cooldown_secs")]
    cooldown_secs: u64,
    condition: Condition,
    #[serde(default)]
    actions: Vec<Action>,
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    60
}

/// GET /api/rules
async fn list_rules(State(app): State<Arc<AppState>>) -> Json<Vec<Rule>> {
    Json(app.alerting.rules().await)
}

/// POST /api/rules
async fn create_rule(State(app): State<Arc<AppState>>, Json(req): Json<NewRule>) -> ApiResult<Rule> {
    let rule = Rule {
        id: uuid::Uuid::new_v4().to_string(),
        name: req.name,
        enabled: req.enabled,
        cooldown_secs: req.cooldown_secs,
        condition: req.condition,
        actions: req.actions,
        stats: RuleStats::default(),
    };
    app.alerting.create_rule(rule.clone()).await.map_err(|e| AppError::Internal.to_http_response(e.to_string()))?;
    Ok(Json(rule))
}

/// PUT /api/rules/:id
async fn update_rule(
    State(app): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut rule): Json<Rule>,
) -> ApiResult<Rule> {
    rule.id = id;
    let updated =
        app.alerting.update_rule(rule.clone()).await.map_err(|e| AppError::Internal.to_http_response(e.to_string()))?;
    if !updated {
        return Err(AppError::NotFound.to_http_response("rule not found"));
    }
    Ok(Json(rule))
}

/// DELETE /api/rules/:id
async fn delete_rule(State(app): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    let removed = app.alerting.delete_rule(&id).await.map_err(|e| AppError::Internal.to_http_response(e.to_string()))?;
    if !removed {
        return Err(AppError::NotFound.to_http_response(format!("rule {id} not found")));
    }
    Ok(Json(json!({"deleted": true})))
}

/// POST /api/rules/:id/toggle
async fn toggle_rule(State(app): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    let enabled =
        app.alerting.toggle_rule(&id).await.map_err(|e| AppError::Internal.to_http_response(e.to_string()))?;
    match enabled {
        Some(enabled) => Ok(Json(json!({"enabled": enabled}))),
        None => Err(AppError::NotFound.to_http_response(format!("rule {id} not found"))),
    }
}

/// GET /api/rules/:id/stats
async fn rule_stats(State(app): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<RuleStats> {
    app.alerting
        .rules()
        .await
        .into_iter()
        .find(|r| r.id == id)
        .map(|r| Json(r.stats))
        .ok_or_else(|| AppError::NotFound.to_http_response(format!("rule {id} not found")))
}

#[derive(Debug, Deserialize)]
struct TestRuleRequest {
    condition: Condition,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

/// POST /api/rules/test — evaluate a condition against a caller-supplied
/// sample event without touching cooldowns, stats, or actions.
async fn test_rule(State(app): State<Arc<AppState>>, Json(req): Json<TestRuleRequest>) -> Json<serde_json::Value> {
    let event = BufferedEvent { timestamp: crate::now_ms(), kind: req.event_type.unwrap_or_default(), payload: req.payload };
    let matched = app.alerting.test_condition(&req.condition, &event, &app.state).await;
    Json(json!({"matched": matched}))
}

// -- events export ----------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventRow {
    timestamp: i64,
    #[serde(rename = "type")]
    kind: String,
    source: String,
    from: String,
    to: String,
    subject: String,
    message: String,
    action: String,
    preview: String,
}

fn event_row(event: &BufferedEvent) -> EventRow {
    let field = |name: &str| event.payload.get(name).and_then(|v| v.as_str()).unwrap_or("").to_owned();
    let subject = ["title", "entityKey", "beadId", "id"].into_iter().map(field).find(|s| !s.is_empty()).unwrap_or_default();
    let message = ["message", "content"].into_iter().map(field).find(|s| !s.is_empty()).unwrap_or_default();
    EventRow {
        timestamp: event.timestamp,
        kind: event.kind.clone(),
        source: field("rig"),
        from: field("from"),
        to: field("to"),
        subject,
        message,
        action: field("action"),
        preview: field("preview"),
    }
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    #[serde(default = "default_format")]
    format: String,
    rig: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    search: Option<String>,
}

fn default_format() -> String {
    "json".to_owned()
}

/// GET /api/events/export?format=json|csv&rig=&type=&search=
async fn export_events(State(app): State<Arc<AppState>>, Query(q): Query<ExportQuery>) -> Response {
    let events = app.state.event_buffer.read().await.all_events().to_vec();
    let search = q.search.as_deref().map(str::to_lowercase);
    let rows: Vec<EventRow> = events
        .iter()
        .map(event_row)
        .filter(|r| q.rig.as_deref().map_or(true, |rig| r.source.eq_ignore_ascii_case(rig)))
        .filter(|r| q.kind.as_deref().map_or(true, |k| r.kind.eq_ignore_ascii_case(k)))
        .filter(|r| {
            search.as_deref().map_or(true, |s| r.message.to_lowercase().contains(s) || r.subject.to_lowercase().contains(s))
        })
        .collect();

    if q.format.eq_ignore_ascii_case("csv") {
        csv_response(&rows)
    } else {
        Json(rows).into_response()
    }
}

fn csv_response(rows: &[EventRow]) -> Response {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        if let Err(e) = writer.serialize(row) {
            tracing::warn!(err = %e, "csv export row failed");
        }
    }
    let bytes = writer.into_inner().unwrap_or_else(|e| e.into_inner());
    ([(header::CONTENT_TYPE, "text/csv")], bytes).into_response()
}

// -- metrics / historical ----------------------------------------------------

#[derive(Debug, Deserialize)]
struct RangeQuery {
    start: Option<i64>,
    end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MetricsHistoryQuery {
    start: i64,
    end: i64,
    #[serde(default)]
    interval: Option<String>,
}

fn parse_interval(value: Option<&str>) -> Result<Interval, ApiError> {
    match value.unwrap_or("auto") {
        "minute" => Ok(Interval::Minute),
        "hour" => Ok(Interval::Hour),
        "day" => Ok(Interval::Day),
        "auto" => Ok(Interval::Auto),
        other => Err(AppError::BadRequest.to_http_response(format!("unknown interval {other:?}"))),
    }
}

/// GET /api/metrics/history?start&end&interval=minute|hour|day|auto
async fn metrics_history(State(app): State<Arc<AppState>>, Query(q): Query<MetricsHistoryQuery>) -> ApiResult<QuerySeries> {
    let interval = parse_interval(q.interval.as_deref())?;
    Ok(Json(app.historical.query_range(q.start, q.end, interval).await))
}

/// GET /api/metrics/summary?start&end
async fn metrics_summary(State(app): State<Arc<AppState>>, Query(q): Query<RangeQuery>) -> Json<PeriodSummary> {
    let now = crate::now_ms();
    let start = q.start.unwrap_or(now - 60 * 60 * 1000);
    let end = q.end.unwrap_or(now);
    Json(app.historical.get_summary(start, end).await)
}

#[derive(Debug, Deserialize)]
struct AgentEfficiencyQuery {
    agent: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
}

/// GET /api/metrics/agents?agent&start&end
async fn metrics_agents(State(app): State<Arc<AppState>>, Query(q): Query<AgentEfficiencyQuery>) -> Json<AgentEfficiency> {
    let now = crate::now_ms();
    let start = q.start.unwrap_or(0);
    let end = q.end.unwrap_or(now);
    Json(app.historical.get_agent_efficiency(q.agent.as_deref(), start, end).await)
}

/// GET /api/metrics/storage
async fn metrics_storage(State(app): State<Arc<AppState>>) -> Json<StorageStats> {
    Json(app.historical.storage_stats().await)
}

/// GET /api/forecast — the HTTP side of the forecaster's own bus topic
/// (spec §4.6: "the HTTP and push layers read it").
async fn get_forecast(State(app): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(app.forecaster.latest().await).unwrap_or(serde_json::Value::Null))
}

// -- timeline -----------------------------------------------------------------

/// GET /api/timeline
async fn timeline_overview(State(app): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let now = crate::now_ms();
    let buffer = app.state.event_buffer.read().await;
    Json(json!({
        "bounds": buffer.timeline_bounds(),
        "stats": buffer.stats(now),
        "markers": buffer.event_markers(),
    }))
}

/// GET /api/timeline/state/:timestamp
async fn timeline_state(State(app): State<Arc<AppState>>, Path(timestamp): Path<i64>) -> Json<ReplayState> {
    Json(app.state.event_buffer.read().await.state_at_time(timestamp))
}

/// GET /api/timeline/events?start&end
async fn timeline_events(State(app): State<Arc<AppState>>, Query(q): Query<RangeQuery>) -> Json<Vec<BufferedEvent>> {
    let now = crate::now_ms();
    let start = q.start.unwrap_or(0);
    let end = q.end.unwrap_or(now);
    Json(app.state.event_buffer.read().await.events_between(start, end).to_vec())
}

/// GET /api/timeline/events/all
async fn timeline_events_all(State(app): State<Arc<AppState>>) -> Json<Vec<BufferedEvent>> {
    Json(app.state.event_buffer.read().await.all_events().to_vec())
}
