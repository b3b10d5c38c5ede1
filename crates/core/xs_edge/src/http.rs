//! The edge HTTP surface.
//!
//! `/status`, `/health`, `/health/view` and `/bus/stats` are open;
//! `/metrics` requires a bearer token.

use crate::auth::TokenAuthority;
use crate::bus::DataBus;
use crate::plugins::PluginRecord;
use crate::store::EventStore;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde_json::json;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::warn;

const HEARTBEAT_STALE_AFTER_SECS: u64 = 30;

#[derive(Clone)]
pub struct BridgeInfo {
    pub broker: String,
    pub port: u16,
    pub edge_id: String,
}

#[derive(Clone)]
pub struct AppState {
    pub records: Vec<Arc<PluginRecord>>,
    pub bus: Arc<DataBus>,
    pub store: Arc<dyn EventStore>,
    pub auth: Arc<TokenAuthority>,
    pub bridge: Option<BridgeInfo>,
    pub started_at: Instant,
    pub version: &'static str,
}

pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/health/view", get(health_view))
        .route("/bus/stats", get(bus_stats))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let plugins: Vec<&str> = state
        .records
        .iter()
        .map(|record| record.meta.name.as_str())
        .collect();
    Json(json!({ "plugins": plugins }))
}

fn collect_health(state: &AppState) -> Value {
    let mut plugins = serde_json::Map::new();
    let mut degraded = false;

    for record in &state.records {
        let entry = match record.heartbeat_age_secs() {
            Some(age) => {
                let status = if age < HEARTBEAT_STALE_AFTER_SECS {
                    "OK"
                } else {
                    degraded = true;
                    "STALE"
                };
                json!({ "last_heartbeat_sec_ago": age, "status": status })
            }
            None => {
                degraded = true;
                json!({ "status": "NO_HEARTBEAT" })
            }
        };
        plugins.insert(record.meta.name.clone(), entry);
    }

    let mqtt_bridge = match &state.bridge {
        Some(bridge) => json!({
            "enabled": true,
            "broker": bridge.broker,
            "port": bridge.port,
            "edge_id": bridge.edge_id,
        }),
        None => json!({ "enabled": false }),
    };

    json!({
        "system": "xs-edge",
        "version": state.version,
        "uptime_sec": state.started_at.elapsed().as_secs(),
        "overall_status": if degraded { "DEGRADED" } else { "OK" },
        "plugins": Value::Object(plugins),
        "mqtt_bridge": mqtt_bridge,
    })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(collect_health(&state))
}

async fn health_view(State(state): State<AppState>) -> Html<String> {
    let health = collect_health(&state);

    let mut rows = String::new();
    if let Some(plugins) = health["plugins"].as_object() {
        for (name, plugin) in plugins {
            let status = plugin["status"].as_str().unwrap_or("-");
            let age = plugin["last_heartbeat_sec_ago"]
                .as_u64()
                .map(|age| age.to_string())
                .unwrap_or_else(|| "-".to_string());
            rows.push_str(&format!(
                "<tr><td>{name}</td><td>{status}</td><td>{age}</td></tr>"
            ));
        }
    }

    let bridge = match &state.bridge {
        Some(bridge) => format!("{}:{}", bridge.broker, bridge.port),
        None => "Disabled".to_string(),
    };

    let html = format!(
        r#"<html>
<head>
    <title>xs-edge Health Dashboard</title>
    <meta http-equiv="refresh" content="10">
    <style>
        body {{ font-family: sans-serif; background:#101010; color:#EEE; }}
        table {{ border-collapse: collapse; width: 80%; margin:auto; }}
        td,th {{ border:1px solid #444; padding:6px; text-align:center; }}
        th {{ background:#333; }}
    </style>
</head>
<body>
    <h2 align="center">xs-edge Health Dashboard</h2>
    <p align="center">Auto-refresh every 10s | Version {version}</p>
    <table>
        <tr><th>Plugin</th><th>Status</th><th>Last Heartbeat (s)</th></tr>
        {rows}
    </table>
    <br>
    <table>
        <tr><th>Overall</th><td>{overall}</td></tr>
        <tr><th>Uptime (s)</th><td>{uptime}</td></tr>
        <tr><th>MQTT Bridge</th><td>{bridge}</td></tr>
    </table>
</body>
</html>"#,
        version = health["version"].as_str().unwrap_or("-"),
        overall = health["overall_status"].as_str().unwrap_or("-"),
        uptime = health["uptime_sec"],
    );
    Html(html)
}

async fn bus_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.bus.stats()))
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(status) = require_bearer(&headers, &state.auth) {
        return (status, Json(json!({ "detail": "Missing or invalid token" })));
    }

    match state.store.recent_events(10) {
        Ok(events) => {
            let events: Vec<Value> = events
                .iter()
                .map(|event| json!({ "ts": event.ts, "rule": event.rule, "data": event.data }))
                .collect();
            (StatusCode::OK, Json(json!({ "events": events })))
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": err.to_string() })),
        ),
    }
}

fn require_bearer(headers: &HeaderMap, auth: &TokenAuthority) -> Result<(), StatusCode> {
    let token = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("");

    if token.is_empty() || !auth.verify(token) {
        warn!("Unauthorized access attempt");
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(())
}
