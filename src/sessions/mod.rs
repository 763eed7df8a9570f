//! Session registry and lifecycle management.
//!
//! [`SessionManager`] is the single authority over every terminal session:
//! it creates them (enforcing name uniqueness among active sessions),
//! resolves them for operations, reaps idle ones, and drives global
//! shutdown. Terminal sessions stay in the registry — still listable and
//! readable — until `forget` removes them or the manager shuts down. A
//! name frees up for reuse as soon as its previous owner is terminal.
//!
//! ## Concurrency
//!
//! The name→session map sits behind an `RwLock`: resolve and list take the
//! read lock and run concurrently; create and forget take the write lock.
//! `create` holds the write lock across the name-check and insert to
//! prevent TOCTOU races between two controllers claiming one name.

pub mod buffer;
pub mod mode;
pub mod screen;
pub mod session;
pub mod spinner;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::HostError;
use crate::util::expand_tilde;
use session::{Session, SessionSpec, SessionStatus, SessionSummary, SignalKind};

/// How often the idle reaper scans for expired sessions.
const REAPER_INTERVAL: Duration = Duration::from_secs(5);

/// Valid session names: path- and URL-safe, bounded length.
fn validate_name(name: &str) -> Result<(), HostError> {
    if name.is_empty() || name.len() > 64 {
        return Err(HostError::invalid_args(
            "name",
            "must be 1..=64 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(HostError::invalid_args(
            "name",
            "allowed characters: a-z A-Z 0-9 - _ .",
        ));
    }
    Ok(())
}

/// Per-create options; anything unset falls back to manager-wide defaults.
#[derive(Debug, Default, Clone)]
pub struct CreateOptions {
    pub shell: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub spinner_compact: Option<bool>,
    pub buffer_lines_cap: Option<usize>,
    pub buffer_bytes_cap: Option<usize>,
    pub idle_timeout_ms: Option<u64>,
}

/// Registry of terminal sessions keyed by name.
///
/// Cloneable — all clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    config: Arc<Config>,
    events: broadcast::Sender<Value>,
    creation_counter: Arc<AtomicU64>,
    shutting_down: Arc<AtomicBool>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>, events: broadcast::Sender<Value>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            events,
            creation_counter: Arc::new(AtomicU64::new(0)),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a new session. Fails with `NameInUse` while an active session
    /// owns the name; a terminal session with the same name is replaced.
    pub async fn create(
        &self,
        name: &str,
        options: CreateOptions,
    ) -> Result<Arc<Session>, HostError> {
        validate_name(name)?;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(HostError::Internal("manager is shutting down".to_string()));
        }
        if let Some(cols) = options.cols {
            validate_geometry("cols", cols)?;
        }
        if let Some(rows) = options.rows {
            validate_geometry("rows", rows)?;
        }

        let mut sessions = self.sessions.write().await;

        let replaced = if let Some(existing) = sessions.get(name) {
            if !existing.status().await.is_terminal() {
                return Err(HostError::NameInUse(name.to_string()));
            }
            true
        } else {
            false
        };

        let terminal = &self.config.terminal;
        let cwd = options
            .cwd
            .as_deref()
            .map(|p| expand_tilde(p).into_owned())
            .or_else(|| std::env::var("HOME").ok())
            .unwrap_or_else(|| "/".to_string());
        let spec = SessionSpec {
            name: name.to_string(),
            shell: options
                .shell
                .unwrap_or_else(|| terminal.default_shell.clone()),
            args: options.args,
            cwd,
            env: options.env,
            cols: options.cols.unwrap_or(terminal.default_cols),
            rows: options.rows.unwrap_or(terminal.default_rows),
            spinner_compact: options
                .spinner_compact
                .unwrap_or(self.config.spinner.enabled),
            spinner_throttle_ms: self.config.spinner.throttle_ms,
            buffer_lines_cap: options
                .buffer_lines_cap
                .unwrap_or(terminal.max_buffer_lines),
            buffer_bytes_cap: options
                .buffer_bytes_cap
                .unwrap_or(terminal.max_buffer_bytes),
            idle_timeout_ms: options
                .idle_timeout_ms
                .unwrap_or(terminal.session_timeout_ms),
        };

        let index = self.creation_counter.fetch_add(1, Ordering::SeqCst);
        let session = Session::spawn(spec, index, self.events.clone())?;

        if let Some(old) = sessions.insert(name.to_string(), Arc::clone(&session)) {
            old.abort_tasks();
        }
        info!(
            "terminal '{name}' created (pid {}, shell {}, {}x{}), total: {}{}",
            session.pid,
            session.shell,
            options.cols.unwrap_or(terminal.default_cols),
            options.rows.unwrap_or(terminal.default_rows),
            sessions.len(),
            if replaced { ", replaced terminal entry" } else { "" },
        );
        drop(sessions);

        let _ = self.events.send(json!({
            "terminalId": name,
            "type": "created",
            "data": { "pid": session.pid },
        }));
        Ok(session)
    }

    /// Look up a session by name.
    pub async fn resolve(&self, name: &str) -> Result<Arc<Session>, HostError> {
        self.sessions
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::NotFound(name.to_string()))
    }

    /// All sessions, ordered by creation time.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut with_index: Vec<(u64, SessionSummary)> = Vec::with_capacity(sessions.len());
        for session in sessions {
            with_index.push((session.creation_index, session.summary().await));
        }
        with_index.sort_by_key(|(index, _)| *index);
        with_index.into_iter().map(|(_, s)| s).collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Signal a session's process group. With `term` or `kill` the session
    /// is marked as killed; the registry entry stays for later reads. A
    /// no-op on already-terminal sessions.
    pub async fn kill(&self, name: &str, signal: SignalKind) -> Result<(), HostError> {
        let session = self.resolve(name).await?;
        match signal {
            SignalKind::Term => {
                tokio::spawn(async move {
                    session.terminate(SessionStatus::Killed).await;
                });
                Ok(())
            }
            SignalKind::Kill => {
                // Record intent first so the watcher publishes `killed`
                session.terminate_now().await;
                Ok(())
            }
            other => session.signal(other).await,
        }
    }

    /// Remove a terminal session from the registry. Fails while active.
    pub async fn forget(&self, name: &str) -> Result<(), HostError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get(name)
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        if !session.status().await.is_terminal() {
            return Err(HostError::invalid_args(
                "name",
                "session is still active; kill it first",
            ));
        }
        if let Some(session) = sessions.remove(name) {
            session.abort_tasks();
        }
        info!("terminal '{name}' forgotten, remaining: {}", sessions.len());
        drop(sessions);
        let _ = self.events.send(json!({
            "terminalId": name,
            "type": "destroyed",
            "data": { "reason": "forgotten" },
        }));
        Ok(())
    }

    /// Kill every active session (REST `kill-all`). The manager keeps
    /// running and the entries stay queryable.
    pub async fn kill_all_active(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut killed = 0;
        for session in sessions {
            if !session.status().await.is_terminal() {
                killed += 1;
                tokio::spawn(async move {
                    session.terminate(SessionStatus::Killed).await;
                });
            }
        }
        info!("kill-all: terminating {killed} active session(s)");
        killed
    }

    /// One idle-reaper pass: terminate active sessions whose last activity
    /// (write or PTY output) is older than their idle timeout.
    pub async fn reap_idle(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            if session.idle_timeout_ms == 0 {
                continue;
            }
            if session.status().await.is_terminal() {
                continue;
            }
            if session.idle_ms() > session.idle_timeout_ms {
                warn!(
                    "terminal '{}' idle for {}ms (limit {}ms), reaping",
                    session.name,
                    session.idle_ms(),
                    session.idle_timeout_ms
                );
                tokio::spawn(async move {
                    session.terminate(SessionStatus::TimedOut).await;
                });
            }
        }
    }

    /// Spawn the periodic idle reaper. Aborted on shutdown.
    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAPER_INTERVAL);
            loop {
                interval.tick().await;
                manager.reap_idle().await;
            }
        })
    }

    /// Global shutdown: terminate all children (TERM, grace, KILL), drain
    /// read loops, drop the registry. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, s)| s).collect()
        };
        let count = sessions.len();
        if count == 0 {
            return;
        }

        let mut joins = Vec::with_capacity(count);
        for session in &sessions {
            let session = Arc::clone(session);
            joins.push(tokio::spawn(async move {
                session.terminate(SessionStatus::Killed).await;
            }));
        }
        for join in joins {
            let _ = join.await;
        }
        for session in &sessions {
            session.abort_tasks();
        }
        info!("shut down {count} session(s)");
    }
}

fn validate_geometry(field: &str, value: u16) -> Result<(), HostError> {
    if (1..=1000).contains(&value) {
        Ok(())
    } else {
        Err(HostError::invalid_args(field, "must be in 1..=1000"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buffer::{ReadLimits, ReadMode};
    use session::{AppendNewline, ReadRequest};

    use crate::hooks::HookEngine;

    fn manager() -> SessionManager {
        let mut config = Config::default();
        config.terminal.default_shell = "/bin/sh".to_string();
        let (events, _) = broadcast::channel(64);
        SessionManager::new(Arc::new(config), events)
    }

    fn opts() -> CreateOptions {
        CreateOptions {
            cwd: Some("/tmp".to_string()),
            ..CreateOptions::default()
        }
    }

    fn no_hooks() -> HookEngine {
        HookEngine::from_config(&crate::config::HooksConfig::default()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_and_resolve_by_name() {
        let mgr = manager();
        let session = mgr.create("t1", opts()).await.unwrap();
        assert!(session.pid > 0);
        let resolved = mgr.resolve("t1").await.unwrap();
        assert_eq!(resolved.name, "t1");
        mgr.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_active_name_is_rejected() {
        let mgr = manager();
        mgr.create("dup", opts()).await.unwrap();
        let err = mgr.create("dup", opts()).await.unwrap_err();
        assert_eq!(err.code(), "NAME_IN_USE");
        mgr.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn name_is_reusable_after_terminal() {
        let mgr = manager();
        let first = mgr.create("reuse", opts()).await.unwrap();
        first.terminate(SessionStatus::Killed).await;
        let _ = first.wait_for_output(None, 100, 5_000).await;

        let second = mgr.create("reuse", opts()).await.unwrap();
        assert_ne!(first.pid, second.pid);
        assert_eq!(mgr.session_count().await, 1);
        mgr.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_names_are_rejected() {
        let mgr = manager();
        assert_eq!(
            mgr.create("", opts()).await.unwrap_err().code(),
            "INVALID_ARGS"
        );
        assert_eq!(
            mgr.create("has space", opts()).await.unwrap_err().code(),
            "INVALID_ARGS"
        );
        assert_eq!(
            mgr.create("has/slash", opts()).await.unwrap_err().code(),
            "INVALID_ARGS"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_is_ordered_by_creation() {
        let mgr = manager();
        mgr.create("alpha", opts()).await.unwrap();
        mgr.create("bravo", opts()).await.unwrap();
        mgr.create("charlie", opts()).await.unwrap();
        let names: Vec<String> = mgr.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
        mgr.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn killed_sessions_stay_listed_until_forgotten() {
        let mgr = manager();
        let session = mgr.create("keeper", opts()).await.unwrap();
        mgr.kill("keeper", SignalKind::Kill).await.unwrap();
        let _ = session.wait_for_output(None, 100, 5_000).await;

        let listed = mgr.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, SessionStatus::Killed);

        mgr.forget("keeper").await.unwrap();
        assert_eq!(mgr.session_count().await, 0);
        assert_eq!(
            mgr.resolve("keeper").await.unwrap_err().code(),
            "NOT_FOUND"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn forget_refuses_active_sessions() {
        let mgr = manager();
        mgr.create("busy", opts()).await.unwrap();
        let err = mgr.forget("busy").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGS");
        mgr.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn output_persists_across_subscriber_loss() {
        // Session-outlives-client: no subscriber is attached at all; output
        // accumulates and a later read finds it.
        let mgr = manager();
        let session = mgr.create("persist", opts()).await.unwrap();
        session
            .write(
                "sleep 1; echo done-after-sleep",
                AppendNewline::Auto,
                None,
                &no_hooks(),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let read = session
            .read(ReadRequest {
                since: 0,
                mode: ReadMode::Tail { lines: 5 },
                limits: ReadLimits {
                    max_lines: 0,
                    max_bytes: 0,
                },
                strip_spinner: None,
                filter: None,
            })
            .await;
        assert!(
            read.output.contains("done-after-sleep"),
            "missing output: {:?}",
            read.output
        );
        mgr.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_sessions_keep_streams_ordered() {
        let mgr = manager();
        let mut handles = Vec::new();
        for i in 0..3 {
            let name = format!("conc-{i}");
            let session = mgr.create(&name, opts()).await.unwrap();
            let hooks = no_hooks();
            handles.push(tokio::spawn(async move {
                session
                    .write(
                        "for n in 1 2 3 4 5; do echo seq-$n; done",
                        AppendNewline::Auto,
                        None,
                        &hooks,
                    )
                    .await
                    .unwrap();
                let out = session.wait_for_output(Some(0), 400, 8_000).await;
                let positions: Vec<usize> = (1..=5)
                    .map(|n| {
                        out.output
                            .find(&format!("seq-{n}"))
                            .unwrap_or_else(|| panic!("seq-{n} missing in {:?}", out.output))
                    })
                    .collect();
                let mut sorted = positions.clone();
                sorted.sort_unstable();
                assert_eq!(positions, sorted, "out-of-order output");
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        mgr.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn idle_reaper_times_out_sessions() {
        let mgr = manager();
        let session = mgr
            .create(
                "sleepy",
                CreateOptions {
                    idle_timeout_ms: Some(300),
                    ..opts()
                },
            )
            .await
            .unwrap();
        // Let the prompt settle, then go idle past the limit
        tokio::time::sleep(Duration::from_millis(900)).await;
        mgr.reap_idle().await;
        let _ = session.wait_for_output(None, 100, 6_000).await;
        assert_eq!(session.status().await, SessionStatus::TimedOut);
        mgr.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_is_idempotent() {
        let mgr = manager();
        mgr.create("bye", opts()).await.unwrap();
        mgr.shutdown().await;
        mgr.shutdown().await;
        assert_eq!(mgr.session_count().await, 0);
    }
}
