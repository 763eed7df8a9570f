//! Shell discovery for the UI's terminal-creation dialog.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::shell::detect_shells;
use crate::state::AppState;

/// `GET /api/shells` — usable shells on this host plus the configured default.
pub async fn list_shells(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "shells": detect_shells(),
        "default_shell": state.config.terminal.default_shell,
    }))
}
