//! MCP tool definitions and handlers — the host's operation surface.
//!
//! Each operation is defined as a JSON schema (returned by
//! [`tool_definitions`]) and handled by an async function dispatched from
//! [`handle_tool_call`]. The same functions back the REST mirror, so the
//! two surfaces cannot drift.
//!
//! Argument validation is strict: unknown fields are rejected (every arg
//! struct is `deny_unknown_fields`), `cols`/`rows` must be in 1..=1000, and
//! wait timeouts must be positive.
//!
//! | Tool              | Purpose                                        |
//! |-------------------|------------------------------------------------|
//! | `create_terminal` | Spawn a named PTY session                      |
//! | `write_terminal`  | Send input or a special key through the hooks  |
//! | `read_terminal`   | Cursor/mode read with post-filters             |
//! | `list_terminals`  | Enumerate sessions in creation order           |
//! | `kill_terminal`   | Signal a session (entry stays queryable)       |
//! | `wait_for_output` | Block until quiet / timeout / exit             |
//! | `resize_terminal` | Change PTY geometry                            |
//! | `stats_terminal`  | Counters and lifecycle state                   |

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::HostError;
use crate::sessions::buffer::{ReadLimits, ReadMode};
use crate::sessions::session::{AppendNewline, ReadRequest, SignalKind};
use crate::sessions::CreateOptions;
use crate::shell::keys::SpecialKey;
use crate::state::AppState;

/// Page size when a forward read doesn't bound itself.
const DEFAULT_MAX_LINES: usize = 1000;
/// Default window for head/tail reads.
const DEFAULT_EDGE_LINES: usize = 100;

/// Result of one tool invocation, in MCP `tools/call` shape.
#[derive(Debug)]
pub struct ToolResult {
    pub content: Vec<Value>,
    pub is_error: bool,
}

impl ToolResult {
    fn success(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self {
            content: vec![json!({ "type": "text", "text": text })],
            is_error: false,
        }
    }

    fn error(err: &HostError) -> Self {
        Self {
            content: vec![json!({
                "type": "text",
                "text": format!("{}: {err}", err.code()),
            })],
            is_error: true,
        }
    }
}

/// All tool definitions, in the order they are documented above.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "create_terminal",
            "description": "Create a named persistent terminal session backed by a PTY. The session survives disconnects; output keeps accumulating until the process exits and the session is forgotten.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Unique session name (a-z A-Z 0-9 - _ .). Reusable once a previous session with this name has ended."
                    },
                    "shell": {
                        "type": "string",
                        "description": "Shell or program to run. Defaults to the configured shell."
                    },
                    "cwd": {
                        "type": "string",
                        "description": "Working directory (supports leading ~). Defaults to $HOME."
                    },
                    "env": {
                        "type": "object",
                        "description": "Environment variables merged over the inherited environment.",
                        "additionalProperties": { "type": "string" }
                    },
                    "cols": { "type": "integer", "minimum": 1, "maximum": 1000 },
                    "rows": { "type": "integer", "minimum": 1, "maximum": 1000 }
                },
                "required": ["name"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "write_terminal",
            "description": "Write input to a terminal. By default a carriage return is appended automatically when the input looks like a single command (append_newline=\"auto\"); pass false to send raw keystrokes. Use `special` for control keys (ctrl_c, ctrl_d, ctrl_z, esc, double_esc, enter). The reply may carry an annotation with usage guidance for the command you ran.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "input": { "type": "string", "description": "Text to write. Ignored when special is set." },
                    "special": {
                        "type": "string",
                        "enum": ["ctrl_c", "ctrl_d", "ctrl_z", "esc", "double_esc", "enter"]
                    },
                    "append_newline": {
                        "description": "true | false | \"auto\" (default auto).",
                        "anyOf": [ { "type": "boolean" }, { "type": "string", "enum": ["auto"] } ]
                    }
                },
                "required": ["name"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "read_terminal",
            "description": "Read terminal output. Cursor-based: pass the cursor from a previous read/wait as `since` to get only new output. Modes: full (paged from since), head/tail (first/last N lines), head_tail (both ends with an omission marker). If output was evicted before your cursor, dropped_before reports how many lines you missed and the read resumes at the oldest retained byte.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "since": { "type": "integer", "minimum": 0, "description": "Cursor from a previous call. Defaults to 0 (oldest retained)." },
                    "mode": { "type": "string", "enum": ["full", "head", "tail", "head_tail"] },
                    "head_lines": { "type": "integer", "minimum": 0 },
                    "tail_lines": { "type": "integer", "minimum": 0 },
                    "max_lines": { "type": "integer", "minimum": 0 },
                    "max_bytes": { "type": "integer", "minimum": 0 },
                    "strip_spinner": { "type": "boolean", "description": "Override the session's spinner compaction default." },
                    "filter_regex": { "type": "string", "description": "Keep only lines matching this regex." },
                    "direction": { "type": "string", "enum": ["forward", "backward"] }
                },
                "required": ["name"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "list_terminals",
            "description": "List all terminal sessions (active and ended) in creation order.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        }),
        json!({
            "name": "kill_terminal",
            "description": "Signal a terminal's process group. Default signal is term (graceful, escalating to kill). The session entry remains readable until forgotten.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "signal": { "type": "string", "enum": ["interrupt", "suspend", "eof", "term", "kill"] }
                },
                "required": ["name"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "wait_for_output",
            "description": "Wait until the terminal goes quiet for idle_ms, the overall timeout elapses, or the session ends — then return everything printed since `since` (defaults to the moment of the call). This is the reliable way to observe a command's response: write, then wait.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "since": { "type": "integer", "minimum": 0 },
                    "idle_ms": { "type": "integer", "minimum": 1 },
                    "overall_timeout_ms": { "type": "integer", "minimum": 1 }
                },
                "required": ["name", "idle_ms", "overall_timeout_ms"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "resize_terminal",
            "description": "Resize the terminal's PTY.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "cols": { "type": "integer", "minimum": 1, "maximum": 1000 },
                    "rows": { "type": "integer", "minimum": 1, "maximum": 1000 }
                },
                "required": ["name", "cols", "rows"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": "stats_terminal",
            "description": "Lifecycle state and I/O counters for one terminal: status, pid, uptime, retained buffer size, bytes written/produced, alt-screen flag, last activity.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" }
                },
                "required": ["name"],
                "additionalProperties": false
            }
        }),
    ]
}

/// Dispatch one `tools/call` to its handler.
pub async fn handle_tool_call(name: &str, args: Value, state: &AppState) -> ToolResult {
    let outcome = match name {
        "create_terminal" => create_terminal(state, args).await,
        "write_terminal" => write_terminal(state, args).await,
        "read_terminal" => read_terminal(state, args).await,
        "list_terminals" => list_terminals(state, args).await,
        "kill_terminal" => kill_terminal(state, args).await,
        "wait_for_output" => wait_for_output(state, args).await,
        "resize_terminal" => resize_terminal(state, args).await,
        "stats_terminal" => stats_terminal(state, args).await,
        other => Err(HostError::invalid_args("name", format!("unknown tool: {other}"))),
    };
    match outcome {
        Ok(value) => ToolResult::success(&value),
        Err(err) => ToolResult::error(&err),
    }
}

fn parse<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, HostError> {
    serde_json::from_value(args).map_err(|e| HostError::invalid_args("arguments", e.to_string()))
}

fn check_geometry(field: &str, value: Option<u16>) -> Result<(), HostError> {
    match value {
        Some(v) if !(1..=1000).contains(&v) => {
            Err(HostError::invalid_args(field, "must be in 1..=1000"))
        }
        _ => Ok(()),
    }
}

// ─── create_terminal ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateArgs {
    name: String,
    shell: Option<String>,
    cwd: Option<String>,
    env: Option<HashMap<String, String>>,
    cols: Option<u16>,
    rows: Option<u16>,
}

pub async fn create_terminal(state: &AppState, args: Value) -> Result<Value, HostError> {
    let args: CreateArgs = parse(args)?;
    check_geometry("cols", args.cols)?;
    check_geometry("rows", args.rows)?;
    let session = state
        .manager
        .create(
            &args.name,
            CreateOptions {
                shell: args.shell,
                cwd: args.cwd,
                env: args.env.unwrap_or_default(),
                cols: args.cols,
                rows: args.rows,
                ..CreateOptions::default()
            },
        )
        .await?;
    Ok(json!({
        "name": session.name,
        "pid": session.pid,
        "created_at": session.created_at_ms,
    }))
}

// ─── write_terminal ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WriteArgs {
    name: String,
    input: Option<String>,
    special: Option<SpecialKey>,
    append_newline: Option<AppendNewline>,
}

pub async fn write_terminal(state: &AppState, args: Value) -> Result<Value, HostError> {
    let args: WriteArgs = parse(args)?;
    if args.input.is_none() && args.special.is_none() {
        return Err(HostError::invalid_args(
            "input",
            "either input or special is required",
        ));
    }
    let session = state.manager.resolve(&args.name).await?;
    let hooks = state.hooks.read().await;
    let annotation = session
        .write(
            args.input.as_deref().unwrap_or(""),
            args.append_newline.unwrap_or_default(),
            args.special,
            &hooks,
        )
        .await?;
    let mut result = json!({ "ok": true });
    if let Some(note) = annotation {
        result["annotation"] = json!(note);
    }
    Ok(result)
}

// ─── read_terminal ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReadModeArg {
    #[default]
    Full,
    Head,
    Tail,
    HeadTail,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DirectionArg {
    #[default]
    Forward,
    Backward,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadArgs {
    name: String,
    since: Option<u64>,
    mode: Option<ReadModeArg>,
    head_lines: Option<usize>,
    tail_lines: Option<usize>,
    max_lines: Option<usize>,
    max_bytes: Option<usize>,
    strip_spinner: Option<bool>,
    filter_regex: Option<String>,
    direction: Option<DirectionArg>,
}

impl ReadArgs {
    fn into_request(self) -> Result<(String, ReadRequest), HostError> {
        let mode = match self.mode.unwrap_or_default() {
            ReadModeArg::Full => ReadMode::Full {
                backward: self.direction.unwrap_or_default() == DirectionArg::Backward,
            },
            ReadModeArg::Head => ReadMode::Head {
                lines: self.head_lines.unwrap_or(DEFAULT_EDGE_LINES),
            },
            ReadModeArg::Tail => ReadMode::Tail {
                lines: self.tail_lines.unwrap_or(DEFAULT_EDGE_LINES),
            },
            ReadModeArg::HeadTail => ReadMode::HeadTail {
                head: self.head_lines.unwrap_or(DEFAULT_EDGE_LINES / 2),
                tail: self.tail_lines.unwrap_or(DEFAULT_EDGE_LINES / 2),
            },
        };
        let filter = self
            .filter_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| HostError::invalid_args("filter_regex", e.to_string()))?;
        let max_lines = match (self.max_lines, mode) {
            (Some(n), _) => n,
            (None, ReadMode::Full { .. }) => DEFAULT_MAX_LINES,
            (None, _) => 0,
        };
        Ok((
            self.name,
            ReadRequest {
                since: self.since.unwrap_or(0),
                mode,
                limits: ReadLimits {
                    max_lines,
                    max_bytes: self.max_bytes.unwrap_or(0),
                },
                strip_spinner: self.strip_spinner,
                filter,
            },
        ))
    }
}

pub async fn read_terminal(state: &AppState, args: Value) -> Result<Value, HostError> {
    let args: ReadArgs = parse(args)?;
    let (name, request) = args.into_request()?;
    let session = state.manager.resolve(&name).await?;
    let read = session.read(request).await;
    Ok(json!({
        "output": read.output,
        "cursor": read.cursor,
        "has_more": read.has_more,
        "dropped_before": read.dropped_before,
        "dropped_bytes": read.dropped_bytes,
        "token_estimate": read.token_estimate,
    }))
}

// ─── list / kill / wait / resize / stats ─────────────────────────────────────

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

pub async fn list_terminals(state: &AppState, args: Value) -> Result<Value, HostError> {
    let _: NoArgs = parse(args)?;
    let terminals = state.manager.list().await;
    Ok(json!({ "terminals": terminals }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KillArgs {
    name: String,
    signal: Option<SignalKind>,
}

pub async fn kill_terminal(state: &AppState, args: Value) -> Result<Value, HostError> {
    let args: KillArgs = parse(args)?;
    state
        .manager
        .kill(&args.name, args.signal.unwrap_or(SignalKind::Term))
        .await?;
    Ok(json!({ "ok": true }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WaitArgs {
    name: String,
    since: Option<u64>,
    idle_ms: u64,
    overall_timeout_ms: u64,
}

pub async fn wait_for_output(state: &AppState, args: Value) -> Result<Value, HostError> {
    let args: WaitArgs = parse(args)?;
    if args.idle_ms == 0 {
        return Err(HostError::invalid_args("idle_ms", "must be > 0"));
    }
    if args.overall_timeout_ms == 0 {
        return Err(HostError::invalid_args("overall_timeout_ms", "must be > 0"));
    }
    let session = state.manager.resolve(&args.name).await?;
    let wait = session
        .wait_for_output(args.since, args.idle_ms, args.overall_timeout_ms)
        .await;
    Ok(json!({
        "output": wait.output,
        "cursor": wait.cursor,
        "reason": wait.reason.as_str(),
    }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ResizeArgs {
    name: String,
    cols: u16,
    rows: u16,
}

pub async fn resize_terminal(state: &AppState, args: Value) -> Result<Value, HostError> {
    let args: ResizeArgs = parse(args)?;
    check_geometry("cols", Some(args.cols))?;
    check_geometry("rows", Some(args.rows))?;
    let session = state.manager.resolve(&args.name).await?;
    session.resize(args.cols, args.rows).await?;
    Ok(json!({ "ok": true }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StatsArgs {
    name: String,
}

pub async fn stats_terminal(state: &AppState, args: Value) -> Result<Value, HostError> {
    let args: StatsArgs = parse(args)?;
    let session = state.manager.resolve(&args.name).await?;
    let stats = session.stats().await;
    serde_json::to_value(&stats).map_err(|e| HostError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use tokio::sync::{broadcast, RwLock};

    use crate::config::Config;
    use crate::hooks::HookEngine;
    use crate::mcp::McpSessionPool;
    use crate::sessions::SessionManager;

    fn test_state() -> AppState {
        let mut config = Config::default();
        config.terminal.default_shell = "/bin/sh".to_string();
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

    #[test]
    fn definitions_cover_all_eight_operations() {
        let defs = tool_definitions();
        let names: Vec<&str> = defs
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "create_terminal",
                "write_terminal",
                "read_terminal",
                "list_terminals",
                "kill_terminal",
                "wait_for_output",
                "resize_terminal",
                "stats_terminal",
            ]
        );
        for def in &defs {
            assert_eq!(def["inputSchema"]["additionalProperties"], json!(false));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_fields_are_rejected() {
        let state = test_state();
        let result = handle_tool_call(
            "create_terminal",
            json!({ "name": "x", "bogus": 1 }),
            &state,
        )
        .await;
        assert!(result.is_error);
        let text = result.content[0]["text"].as_str().unwrap();
        assert!(text.contains("INVALID_ARGS"), "{text}");
        assert!(text.contains("bogus"), "{text}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn geometry_out_of_range_is_rejected() {
        let state = test_state();
        let result = handle_tool_call(
            "create_terminal",
            json!({ "name": "x", "cols": 2000 }),
            &state,
        )
        .await;
        assert!(result.is_error);

        let result = handle_tool_call(
            "resize_terminal",
            json!({ "name": "x", "cols": 0, "rows": 24 }),
            &state,
        )
        .await;
        assert!(result.is_error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_tool_is_an_error() {
        let state = test_state();
        let result = handle_tool_call("frobnicate", json!({}), &state).await;
        assert!(result.is_error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_requires_input_or_special() {
        let state = test_state();
        let result = handle_tool_call("write_terminal", json!({ "name": "x" }), &state).await;
        assert!(result.is_error);
        let text = result.content[0]["text"].as_str().unwrap();
        assert!(text.contains("INVALID_ARGS"), "{text}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_validates_timeouts() {
        let state = test_state();
        let result = handle_tool_call(
            "wait_for_output",
            json!({ "name": "x", "idle_ms": 0, "overall_timeout_ms": 100 }),
            &state,
        )
        .await;
        assert!(result.is_error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn happy_path_create_write_wait_stats() {
        let state = test_state();
        let created = handle_tool_call(
            "create_terminal",
            json!({ "name": "s1", "cwd": "/tmp" }),
            &state,
        )
        .await;
        assert!(!created.is_error, "{:?}", created.content);

        let wrote = handle_tool_call(
            "write_terminal",
            json!({ "name": "s1", "input": "echo tool-surface-hi" }),
            &state,
        )
        .await;
        assert!(!wrote.is_error, "{:?}", wrote.content);

        let waited = handle_tool_call(
            "wait_for_output",
            json!({ "name": "s1", "since": 0, "idle_ms": 300, "overall_timeout_ms": 8000 }),
            &state,
        )
        .await;
        assert!(!waited.is_error);
        let text = waited.content[0]["text"].as_str().unwrap();
        assert!(text.contains("tool-surface-hi"), "{text}");

        let stats = handle_tool_call("stats_terminal", json!({ "name": "s1" }), &state).await;
        let text = stats.content[0]["text"].as_str().unwrap();
        assert!(text.contains("\"status\": \"active\""), "{text}");

        state.manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_unknown_terminal_is_not_found() {
        let state = test_state();
        let result = handle_tool_call("read_terminal", json!({ "name": "ghost" }), &state).await;
        assert!(result.is_error);
        let text = result.content[0]["text"].as_str().unwrap();
        assert!(text.contains("NOT_FOUND"), "{text}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn eviction_reports_dropped_lines() {
        let state = test_state();
        let session = state
            .manager
            .create(
                "evict",
                CreateOptions {
                    cwd: Some("/tmp".to_string()),
                    buffer_lines_cap: Some(100),
                    ..CreateOptions::default()
                },
            )
            .await
            .unwrap();
        // Bypass the shell: append straight into the buffer like a read loop
        // (shell prompt bytes may land in the buffer too, so compare against
        // the buffer's own eviction counter rather than a fixed number)
        let expected_dropped = {
            let mut buf = session.buffer.lock().await;
            for i in 0..1000 {
                buf.append(format!("bulk line {i}\n").as_bytes());
            }
            buf.dropped_lines()
        };
        assert!(expected_dropped >= 900);
        let result = handle_tool_call(
            "read_terminal",
            json!({ "name": "evict", "since": 0, "max_lines": 0 }),
            &state,
        )
        .await;
        assert!(!result.is_error);
        let text = result.content[0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert!(parsed["dropped_before"].as_u64().unwrap() >= expected_dropped);
        state.manager.shutdown().await;
    }
}
