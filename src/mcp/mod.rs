//! MCP (Model Context Protocol) JSON-RPC handler on streamable HTTP.
//!
//! A controller POSTs JSON-RPC 2.0 requests to `/mcp`:
//!
//! | Method              | Description                      |
//! |---------------------|----------------------------------|
//! | `initialize`        | Handshake, returns capabilities and a transport session id |
//! | `tools/list`        | List the terminal tool definitions |
//! | `tools/call`        | Execute a tool and return its result |
//! | `ping`              | Liveness check                   |
//!
//! Notifications (`notifications/*`) are acknowledged with `202 Accepted`.
//!
//! ## Transport sessions
//!
//! `initialize` opens a transport session and returns its id in the
//! `Mcp-Session-Id` response header; the controller echoes it on later
//! requests and may `DELETE /mcp` to end it. Transport session ids are
//! UUIDs and entirely orthogonal to terminal names — one controller
//! session drives many terminals, and terminals outlive the controller.
//!
//! When `mcp.enable_dns_rebinding_protection` is on, requests whose `Host`
//! header is not in `mcp.allowed_hosts` are rejected before any dispatch.

pub mod tools;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::state::AppState;
use crate::util::now_ms;

const SERVER_NAME: &str = "termhost";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROTOCOL_VERSION: &str = "2025-03-26";

const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug)]
struct TransportSession {
    last_seen_ms: u64,
}

/// Pool of MCP transport sessions, keyed by `Mcp-Session-Id`.
#[derive(Clone, Default)]
pub struct McpSessionPool {
    inner: Arc<Mutex<HashMap<String, TransportSession>>>,
}

impl McpSessionPool {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.inner.lock().await.insert(
            id.clone(),
            TransportSession {
                last_seen_ms: now_ms(),
            },
        );
        id
    }

    /// Refresh a session's last-seen time. Returns false for unknown ids.
    async fn touch(&self, id: &str) -> bool {
        match self.inner.lock().await.get_mut(id) {
            Some(session) => {
                session.last_seen_ms = now_ms();
                true
            }
            None => false,
        }
    }

    async fn close(&self, id: &str) -> bool {
        self.inner.lock().await.remove(id).is_some()
    }

    /// Drop transport sessions idle longer than `max_idle_ms`. Returns how
    /// many were removed.
    pub async fn sweep_stale(&self, max_idle_ms: u64) -> usize {
        let now = now_ms();
        let mut inner = self.inner.lock().await;
        let before = inner.len();
        inner.retain(|_, s| now.saturating_sub(s.last_seen_ms) <= max_idle_ms);
        before - inner.len()
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Host-header gate for DNS rebinding protection.
fn host_allowed(state: &AppState, headers: &HeaderMap) -> bool {
    if !state.config.mcp.enable_dns_rebinding_protection {
        return true;
    }
    let Some(host) = headers.get(axum::http::header::HOST).and_then(|h| h.to_str().ok()) else {
        return false;
    };
    // Compare without the port
    let bare = host.rsplit_once(':').map_or(host, |(h, _)| h);
    state
        .config
        .mcp
        .allowed_hosts
        .iter()
        .any(|allowed| allowed == host || allowed == bare)
}

/// `POST /mcp` — one JSON-RPC request (or notification) per call.
pub async fn post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    if !host_allowed(&state, &headers) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "host not allowed" })),
        )
            .into_response();
    }

    let id = request.get("id").cloned();
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");

    // Notifications carry no id and get no body
    if id.is_none() {
        if !method.starts_with("notifications/") {
            debug!("mcp: unknown notification: {method}");
        }
        return StatusCode::ACCEPTED.into_response();
    }

    // Validate the transport session when the controller presents one
    if let Some(session_id) = headers.get(SESSION_HEADER).and_then(|h| h.to_str().ok()) {
        if method != "initialize" && !state.mcp_sessions.touch(session_id).await {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "unknown MCP session" })),
            )
                .into_response();
        }
    }

    let (response, new_session) = dispatch(&state, method, &request).await;
    let response = inject_id(response, id);

    let mut http = Json(response).into_response();
    if let Some(session_id) = new_session {
        if let Ok(value) = session_id.parse() {
            http.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    http
}

/// `GET /mcp` — this transport does not offer a server-initiated stream.
pub async fn get() -> Response {
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

/// `DELETE /mcp` — end a transport session.
pub async fn delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|h| h.to_str().ok()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.mcp_sessions.close(session_id).await {
        info!("mcp: transport session {session_id} closed");
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// Dispatch a request; returns `(response, new_transport_session_id)`.
async fn dispatch(state: &AppState, method: &str, request: &Value) -> (Value, Option<String>) {
    match method {
        "initialize" => {
            let session_id = state.mcp_sessions.open().await;
            info!("mcp: transport session {session_id} opened");
            (
                json!({
                    "jsonrpc": "2.0",
                    "result": {
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {
                            "tools": {}
                        },
                        "serverInfo": {
                            "name": SERVER_NAME,
                            "version": SERVER_VERSION
                        }
                    }
                }),
                Some(session_id),
            )
        }
        "tools/list" => (
            json!({
                "jsonrpc": "2.0",
                "result": { "tools": tools::tool_definitions() }
            }),
            None,
        ),
        "tools/call" => {
            let params = request.get("params").cloned().unwrap_or(json!({}));
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let args = params.get("arguments").cloned().unwrap_or(json!({}));

            let result = tools::handle_tool_call(name, args, state).await;
            let mut body = json!({ "content": result.content });
            if result.is_error {
                body["isError"] = json!(true);
            }
            (json!({ "jsonrpc": "2.0", "result": body }), None)
        }
        "ping" => (json!({ "jsonrpc": "2.0", "result": {} }), None),
        other => (
            json!({
                "jsonrpc": "2.0",
                "error": {
                    "code": -32601,
                    "message": format!("Method not found: {other}")
                }
            }),
            None,
        ),
    }
}

fn inject_id(mut response: Value, id: Option<Value>) -> Value {
    if let Some(id) = id {
        response["id"] = id;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use tokio::sync::{broadcast, RwLock};

    use crate::config::Config;
    use crate::hooks::HookEngine;
    use crate::sessions::SessionManager;

    fn test_state(rebind_protect: bool) -> AppState {
        let mut config = Config::default();
        config.terminal.default_shell = "/bin/sh".to_string();
        config.mcp.enable_dns_rebinding_protection = rebind_protect;
        let config = Arc::new(config);
        let (events, _) = broadcast::channel(64);
        AppState {
            manager: SessionManager::new(Arc::clone(&config), events.clone()),
            hooks: Arc::new(RwLock::new(
                HookEngine::from_config(&config.hooks).unwrap(),
            )),
            config,
            start_time: Instant::now(),
            session_events: events,
            mcp_sessions: McpSessionPool::new(),
        }
    }

    #[tokio::test]
    async fn initialize_opens_a_transport_session() {
        let state = test_state(false);
        let (response, session) =
            dispatch(&state, "initialize", &json!({ "method": "initialize" })).await;
        assert!(session.is_some());
        assert_eq!(
            response["result"]["serverInfo"]["name"],
            json!(SERVER_NAME)
        );
        assert_eq!(state.mcp_sessions.count().await, 1);
    }

    #[tokio::test]
    async fn tools_list_returns_definitions() {
        let state = test_state(false);
        let (response, _) = dispatch(&state, "tools/list", &json!({})).await;
        assert_eq!(response["result"]["tools"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn unknown_method_is_a_jsonrpc_error() {
        let state = test_state(false);
        let (response, _) = dispatch(&state, "sessions/teleport", &json!({})).await;
        assert_eq!(response["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn pool_touch_and_close() {
        let pool = McpSessionPool::new();
        let id = pool.open().await;
        assert!(pool.touch(&id).await);
        assert!(!pool.touch("nope").await);
        assert!(pool.close(&id).await);
        assert!(!pool.close(&id).await);
        assert_eq!(pool.count().await, 0);
    }

    #[test]
    fn host_gate_honors_allowlist() {
        let state = test_state(true);
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::HOST, "localhost:3001".parse().unwrap());
        assert!(host_allowed(&state, &headers));

        headers.insert(axum::http::header::HOST, "evil.example".parse().unwrap());
        assert!(!host_allowed(&state, &headers));

        let open_state = test_state(false);
        assert!(host_allowed(&open_state, &headers));
    }
}
