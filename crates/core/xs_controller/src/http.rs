//! The controller HTTP surface.
//!
//! Read routes and `/edges/register` are open; `/commands/send` and
//! `/rules/push` require a bearer token bought from `/auth/token` with the
//! master key. `/ws/telemetry` upgrades to the live observer stream.

use crate::auth::CtrlAuth;
use crate::dispatch::CommandDispatcher;
use crate::dispatch::DispatchError;
use crate::dispatch::SendCommandRequest;
use crate::observers::ObserverRegistry;
use crate::rules_push::RulesPublisher;
use crate::rules_push::RulesPushRequest;
use crate::store::ControllerStore;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::Query;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::error;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ControllerStore>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub publisher: Arc<RulesPublisher>,
    pub observers: Arc<ObserverRegistry>,
    pub auth: Arc<CtrlAuth>,
}

pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/edges/register", post(register_edge))
        .route("/edges", get(list_edges))
        .route("/telemetry/latest", get(latest_telemetry))
        .route("/commands/send", post(send_command))
        .route("/rules/push", post(push_rules))
        .route("/auth/token", post(issue_token))
        .route("/ws/telemetry", get(telemetry_ws))
        .with_state(state)
}

async fn register_edge(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let Some(edge_id) = payload.get("edge_id").and_then(|id| id.as_str()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "edge_id missing" })),
        );
    };
    let version = payload
        .get("version")
        .and_then(|version| version.as_str())
        .unwrap_or("unknown");

    match state.store.upsert_edge(edge_id, version) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "edge_id": edge_id })),
        ),
        Err(err) => {
            error!("Cannot register edge {edge_id}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": err.to_string() })),
            )
        }
    }
}

async fn list_edges(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_edges() {
        Ok(edges) => (StatusCode::OK, Json(json!(edges))),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": err.to_string() })),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct LatestParams {
    limit: Option<usize>,
}

async fn latest_telemetry(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(20);
    match state.store.latest_telemetry(limit) {
        Ok(rows) => {
            let rows: Vec<Value> = rows
                .iter()
                .map(|row| {
                    let data: Value =
                        serde_json::from_str(&row.data).unwrap_or(Value::Object(Default::default()));
                    json!({
                        "edge_id": row.edge_id,
                        "topic": row.topic,
                        "data": data,
                        "ts": row.ts,
                    })
                })
                .collect();
            (StatusCode::OK, Json(json!(rows)))
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": err.to_string() })),
        ),
    }
}

async fn send_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendCommandRequest>,
) -> impl IntoResponse {
    if let Err(status) = require_bearer(&headers, &state.auth) {
        return (status, Json(json!({ "detail": "Missing or invalid token" })));
    }

    match state.dispatcher.send(request) {
        Ok(receipt) => (StatusCode::OK, Json(json!(receipt))),
        Err(err @ DispatchError::MissingField) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": err.to_string() })),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": err.to_string() })),
        ),
    }
}

async fn push_rules(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RulesPushRequest>,
) -> impl IntoResponse {
    if let Err(status) = require_bearer(&headers, &state.auth) {
        return (status, Json(json!({ "detail": "Missing or invalid token" })));
    }

    match state.publisher.push(request) {
        Ok(receipt) => (StatusCode::OK, Json(json!(receipt))),
        Err(err) if err.is_client_error() => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": err.to_string() })),
        ),
        Err(err) => {
            error!("[Rules] Push failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": format!("Push failed: {err}") })),
            )
        }
    }
}

async fn issue_token(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let api_key = payload
        .get("api_key")
        .and_then(|key| key.as_str())
        .unwrap_or("");
    match state.auth.issue_token(api_key) {
        Some(token) => (
            StatusCode::OK,
            Json(json!({ "access_token": token, "token_type": "bearer" })),
        ),
        None => (
            StatusCode::FORBIDDEN,
            Json(json!({ "detail": "Invalid API key" })),
        ),
    }
}

async fn telemetry_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let observers = state.observers.clone();
    ws.on_upgrade(move |socket| observe(socket, observers))
}

/// Own one observer socket: drain its channel into the socket, drop the
/// registration on the first failure or on peer close.
async fn observe(mut socket: WebSocket, observers: Arc<ObserverRegistry>) {
    let (id, mut payloads) = observers.add();

    loop {
        tokio::select! {
            payload = payloads.recv() => {
                match payload {
                    Some(payload) => {
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Client frames are ignored; the stream is one-way.
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }

    observers.remove(id);
}

fn require_bearer(headers: &HeaderMap, auth: &CtrlAuth) -> Result<(), StatusCode> {
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
