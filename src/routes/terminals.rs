//! REST mirror of the terminal tool surface.
//!
//! - `GET    /api/terminals`                — list
//! - `POST   /api/terminals`                — create
//! - `POST   /api/terminals/kill-all`       — kill every active session
//! - `GET    /api/terminals/{name}`         — summary
//! - `DELETE /api/terminals/{name}?signal=` — kill (or `?forget=true` to drop
//!   an ended session from the registry)
//! - `POST   /api/terminals/{name}/input`   — write
//! - `GET    /api/terminals/{name}/output`  — cursor/mode read
//! - `GET    /api/terminals/{name}/stats`   — counters
//! - `POST   /api/terminals/{name}/resize`  — PTY resize
//!
//! Request fields are camelCase (the UI's convention); wherever an
//! operation exists on the MCP surface the handler delegates to the same
//! function in [`crate::mcp::tools`], so the two surfaces cannot drift.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::HostError;
use crate::mcp::tools;
use crate::sessions::session::{AppendNewline, SignalKind};
use crate::sessions::CreateOptions;
use crate::shell::keys::SpecialKey;
use crate::state::AppState;

/// `GET /api/terminals` — all sessions in creation order.
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "terminals": state.manager.list().await }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    pub name: String,
    pub shell: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub spinner_compact: Option<bool>,
    pub buffer_lines_cap: Option<usize>,
    pub buffer_bytes_cap: Option<usize>,
    pub idle_timeout_ms: Option<u64>,
}

/// `POST /api/terminals` — create a session. Unlike the MCP tool, the UI
/// may pass shell args and per-session buffer/timeout overrides.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBody>,
) -> Result<(StatusCode, Json<Value>), HostError> {
    let session = state
        .manager
        .create(
            &body.name,
            CreateOptions {
                shell: body.shell,
                args: body.args,
                cwd: body.cwd,
                env: body.env,
                cols: body.cols,
                rows: body.rows,
                spinner_compact: body.spinner_compact,
                buffer_lines_cap: body.buffer_lines_cap,
                buffer_bytes_cap: body.buffer_bytes_cap,
                idle_timeout_ms: body.idle_timeout_ms,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "name": session.name,
            "id": session.id,
            "pid": session.pid,
            "created_at": session.created_at_ms,
        })),
    ))
}

/// `GET /api/terminals/{name}` — one session's summary.
pub async fn summary(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, HostError> {
    let session = state.manager.resolve(&name).await?;
    let summary = session.summary().await;
    serde_json::to_value(&summary)
        .map(Json)
        .map_err(|e| HostError::Internal(e.to_string()))
}

#[derive(Deserialize)]
pub struct KillQuery {
    pub signal: Option<SignalKind>,
    pub forget: Option<bool>,
}

/// `DELETE /api/terminals/{name}` — kill the session (default `term`), or
/// remove an ended session with `?forget=true`.
pub async fn kill(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<KillQuery>,
) -> Result<Json<Value>, HostError> {
    if query.forget.unwrap_or(false) {
        state.manager.forget(&name).await?;
        return Ok(Json(json!({ "ok": true, "forgotten": true })));
    }
    state
        .manager
        .kill(&name, query.signal.unwrap_or(SignalKind::Term))
        .await?;
    Ok(Json(json!({ "ok": true })))
}

/// `POST /api/terminals/kill-all` — terminate every active session.
pub async fn kill_all(State(state): State<AppState>) -> Json<Value> {
    let killed = state.manager.kill_all_active().await;
    Json(json!({ "ok": true, "killed": killed }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputBody {
    pub input: Option<String>,
    pub special: Option<SpecialKey>,
    pub append_newline: Option<AppendNewline>,
}

/// `POST /api/terminals/{name}/input` — write through the hook pipeline.
pub async fn input(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<InputBody>,
) -> Result<Json<Value>, HostError> {
    let mut args = json!({ "name": name });
    if let Some(v) = body.input {
        args["input"] = json!(v);
    }
    if let Some(v) = body.special {
        args["special"] = serde_json::to_value(v).unwrap_or(Value::Null);
    }
    if let Some(v) = body.append_newline {
        args["append_newline"] = match v {
            AppendNewline::Always => json!(true),
            AppendNewline::Never => json!(false),
            AppendNewline::Auto => json!("auto"),
        };
    }
    tools::write_terminal(&state, args).await.map(Json)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputQuery {
    pub since: Option<u64>,
    pub mode: Option<String>,
    pub head_lines: Option<usize>,
    pub tail_lines: Option<usize>,
    pub max_lines: Option<usize>,
    pub max_bytes: Option<usize>,
    pub strip_spinner: Option<bool>,
    pub filter_regex: Option<String>,
    pub direction: Option<String>,
}

/// `GET /api/terminals/{name}/output` — cursor/mode read with post-filters.
pub async fn output(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<OutputQuery>,
) -> Result<Json<Value>, HostError> {
    let mut args = json!({ "name": name });
    if let Some(v) = query.since {
        args["since"] = json!(v);
    }
    if let Some(v) = query.mode {
        args["mode"] = json!(v);
    }
    if let Some(v) = query.head_lines {
        args["head_lines"] = json!(v);
    }
    if let Some(v) = query.tail_lines {
        args["tail_lines"] = json!(v);
    }
    if let Some(v) = query.max_lines {
        args["max_lines"] = json!(v);
    }
    if let Some(v) = query.max_bytes {
        args["max_bytes"] = json!(v);
    }
    if let Some(v) = query.strip_spinner {
        args["strip_spinner"] = json!(v);
    }
    if let Some(v) = query.filter_regex {
        args["filter_regex"] = json!(v);
    }
    if let Some(v) = query.direction {
        args["direction"] = json!(v);
    }
    tools::read_terminal(&state, args).await.map(Json)
}

/// `GET /api/terminals/{name}/stats` — lifecycle and I/O counters.
pub async fn stats(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, HostError> {
    tools::stats_terminal(&state, json!({ "name": name }))
        .await
        .map(Json)
}

#[derive(Deserialize)]
pub struct ResizeBody {
    pub cols: u16,
    pub rows: u16,
}

/// `POST /api/terminals/{name}/resize` — change the PTY geometry.
pub async fn resize(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ResizeBody>,
) -> Result<Json<Value>, HostError> {
    tools::resize_terminal(
        &state,
        json!({ "name": name, "cols": body.cols, "rows": body.rows }),
    )
    .await
    .map(Json)
}
