//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::config::Config;
use crate::hooks::HookEngine;
use crate::mcp::McpSessionPool;
use crate::sessions::SessionManager;

/// Shared state for both wire surfaces.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the host started (for uptime reporting).
    pub start_time: Instant,
    /// Registry of terminal sessions.
    pub manager: SessionManager,
    /// Hook rule set; swapped wholesale on SIGHUP reload.
    pub hooks: Arc<RwLock<HookEngine>>,
    /// Broadcast channel for terminal events (`output` is per-subscriber;
    /// this carries `created`/`destroyed`/`exit`/`session_mode`). Every
    /// WebSocket connection subscribes.
    pub session_events: broadcast::Sender<Value>,
    /// MCP transport sessions, keyed by `Mcp-Session-Id`.
    pub mcp_sessions: McpSessionPool,
}
