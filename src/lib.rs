#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! termhost library — a persistent multi-terminal host for AI agents.
//!
//! The core building blocks:
//! - `sessions` — session manager, per-session output buffers, spinner
//!   compaction, alt-screen detection
//! - `shell` — PTY allocation/spawn/resize and special-key tables
//! - `hooks` — blacklist / prefix / suffix / annotation rules for writes
//! - `mcp` — MCP tool surface on streamable HTTP
//! - `routes` — REST surface for the browser UI
//! - `ws` — live WebSocket output stream
//! - `config` — TOML configuration with env overrides

pub mod config;
pub mod error;
pub mod hooks;
pub mod mcp;
pub mod routes;
pub mod sessions;
pub mod shell;
pub mod state;
pub mod util;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use error::HostError;
pub use hooks::HookEngine;
pub use sessions::SessionManager;
pub use state::AppState;
