//! Liveness endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /api/health` — status, uptime, version, session counts.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "terminals": state.manager.session_count().await,
        "mcp_sessions": state.mcp_sessions.count().await,
    }))
}
