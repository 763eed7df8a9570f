#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # termhost
//!
//! Persistent multi-terminal host for AI coding agents.
//!
//! termhost owns long-lived PTY sessions and exposes them on two
//! coordinated surfaces: an MCP tool endpoint (streamable HTTP) for AI
//! controllers and a REST + WebSocket API for the browser UI. Sessions
//! outlive any client connection — a controller can crash mid-command and
//! pick up the output later by cursor.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{delete, get, post},
    Router,
};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use termhost::{
    config::Config, hooks::HookEngine, mcp, routes, sessions::SessionManager, state::AppState, ws,
};

/// Transport sessions idle longer than this are swept (1 hour).
const MCP_SESSION_MAX_IDLE_MS: u64 = 60 * 60 * 1000;

/// Persistent multi-terminal host for AI agents.
#[derive(Parser)]
#[command(name = "termhost", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host (default when no subcommand is given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };
    run_server(config_path.as_deref()).await;
}

async fn run_server(config_path: Option<&str>) {
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("termhost: {e}");
            std::process::exit(1);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let validation_errors = config.validate();
    if !validation_errors.is_empty() {
        for err in &validation_errors {
            error!("config error: {err}");
        }
        std::process::exit(1);
    }

    info!("termhost v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "frontend on {}:{}, mcp on {}:{}",
        config.server.host,
        config.server.frontend_port,
        config.server.host,
        config.server.mcp_port
    );

    let hooks = match HookEngine::from_config(&config.hooks) {
        Ok(engine) => {
            if engine.rule_count() > 0 {
                info!("{} hook rule(s) loaded", engine.rule_count());
            }
            Arc::new(RwLock::new(engine))
        }
        Err(e) => {
            error!("hook config error: {e}");
            std::process::exit(1);
        }
    };

    let config = Arc::new(config);
    let (session_events, _) = broadcast::channel(256);
    let manager = SessionManager::new(Arc::clone(&config), session_events.clone());

    let state = AppState {
        config: Arc::clone(&config),
        start_time: Instant::now(),
        manager: manager.clone(),
        hooks: Arc::clone(&hooks),
        session_events,
        mcp_sessions: mcp::McpSessionPool::new(),
    };

    // ── Routers ──────────────────────────────────────────────────────────

    let cors = build_cors(&config);

    let frontend_app = Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/api/shells", get(routes::shells::list_shells))
        .route(
            "/api/terminals",
            get(routes::terminals::list).post(routes::terminals::create),
        )
        .route("/api/terminals/kill-all", post(routes::terminals::kill_all))
        .route(
            "/api/terminals/{name}",
            get(routes::terminals::summary).delete(routes::terminals::kill),
        )
        .route("/api/terminals/{name}/input", post(routes::terminals::input))
        .route(
            "/api/terminals/{name}/output",
            get(routes::terminals::output),
        )
        .route("/api/terminals/{name}/stats", get(routes::terminals::stats))
        .route(
            "/api/terminals/{name}/resize",
            post(routes::terminals::resize),
        )
        .route("/ws", get(ws::upgrade))
        .with_state(state.clone())
        .layer(cors.clone())
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_connections,
        ));

    let mcp_app = Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/mcp", post(mcp::post).get(mcp::get).delete(mcp::delete))
        .with_state(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_connections,
        ));

    let frontend_listener = TcpListener::bind((
        config.server.host.as_str(),
        config.server.frontend_port,
    ))
    .await
    .expect("failed to bind frontend port");
    let mcp_listener = TcpListener::bind((config.server.host.as_str(), config.server.mcp_port))
        .await
        .expect("failed to bind mcp port");

    // ── Background tasks ─────────────────────────────────────────────────

    let reaper_task = manager.spawn_reaper();

    let mcp_sweep_task = tokio::spawn({
        let pool = state.mcp_sessions.clone();
        async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                let swept = pool.sweep_stale(MCP_SESSION_MAX_IDLE_MS).await;
                if swept > 0 {
                    info!("swept {swept} stale MCP transport session(s)");
                }
            }
        }
    });

    // SIGHUP reloads the hook rule set without touching sessions
    let hook_reload_task = tokio::spawn({
        let hooks = Arc::clone(&hooks);
        let config_path = config_path.map(ToString::to_string);
        async move {
            let Ok(mut hup) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            else {
                return;
            };
            while hup.recv().await.is_some() {
                match Config::load(config_path.as_deref()) {
                    Ok(fresh) => match HookEngine::from_config(&fresh.hooks) {
                        Ok(engine) => {
                            let count = engine.rule_count();
                            *hooks.write().await = engine;
                            info!("hooks reloaded ({count} rule(s))");
                        }
                        Err(e) => warn!("hook reload failed: {e}"),
                    },
                    Err(e) => warn!("hook reload failed: {e}"),
                }
            }
        }
    });

    // ── Serve until SIGINT/SIGTERM ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        let _ = shutdown_tx.send(());
    });

    info!("server ready");

    let frontend_shutdown = {
        let mut rx = shutdown_rx.clone();
        async move {
            let _ = rx.changed().await;
        }
    };
    let mcp_shutdown = {
        let mut rx = shutdown_rx;
        async move {
            let _ = rx.changed().await;
        }
    };

    let frontend_server =
        axum::serve(frontend_listener, frontend_app).with_graceful_shutdown(frontend_shutdown);
    let mcp_server = axum::serve(mcp_listener, mcp_app).with_graceful_shutdown(mcp_shutdown);
    let (frontend_result, mcp_result) =
        tokio::join!(frontend_server.into_future(), mcp_server.into_future());
    if let Err(e) = frontend_result {
        error!("frontend server error: {e}");
    }
    if let Err(e) = mcp_result {
        error!("mcp server error: {e}");
    }

    info!("shutting down...");
    reaper_task.abort();
    mcp_sweep_task.abort();
    hook_reload_task.abort();
    manager.shutdown().await;
    info!("goodbye");
}

/// Build the CORS layer from config: explicit origins, or `*` for any.
fn build_cors(config: &Config) -> CorsLayer {
    let any_origin = config.server.cors_origins.iter().any(|o| o == "*");
    // Methods and headers are listed explicitly — wildcards cannot be
    // combined with credentialed requests.
    let mut cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("mcp-session-id"),
        ])
        .expose_headers([axum::http::HeaderName::from_static("mcp-session-id")]);
    if any_origin {
        cors = cors.allow_origin(tower_http::cors::Any);
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok())
            .collect();
        cors = cors.allow_origin(AllowOrigin::list(origins));
        if config.server.cors_credentials {
            cors = cors.allow_credentials(true);
        }
    }
    cors
}
