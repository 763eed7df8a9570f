//! One managed terminal: PTY child + output buffer + metadata + state machine.
//!
//! A [`Session`] outlives every controller connection: the read loop keeps
//! draining the PTY into the [`OutputBuffer`] whether or not anyone is
//! watching, and the buffer stays queryable after the child exits. The
//! lifecycle is a one-shot transition out of `active`:
//!
//! ```text
//!         spawn             exit / kill / idle-reap
//! initial ──────► active ─────────────────────────► exited | killed | timed_out
//! ```
//!
//! The child is spawned as a session leader on the PTY slave (see
//! [`crate::shell::pty`]), so signals sent to `-pgid` reach the whole
//! process tree and the kernel's job control gives real Ctrl-C behavior.
//!
//! ## Concurrency
//!
//! The read-loop task is the only writer into the buffer. Writes from
//! operation handlers serialize on the PTY writer mutex, which also keeps a
//! hook-injected prefix/user/suffix triple contiguous. The lifecycle field
//! has its own mutex; terminal transitions publish through it exactly once.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};

use crate::error::HostError;
use crate::hooks::HookEngine;
use crate::sessions::buffer::{OutputBuffer, ReadLimits, ReadMode};
use crate::sessions::mode::{infer_kind, SessionKind, StackTracker};
use crate::sessions::screen::{ScreenEvent, ScreenScanner};
use crate::sessions::spinner;
use crate::shell::keys::{SpecialKey, CTRL_D};
use crate::shell::pty;
use crate::util::{estimate_tokens, now_ms};

/// Grace period between SIGTERM and SIGKILL when terminating a session.
const KILL_GRACE: Duration = Duration::from_secs(3);

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Exited,
    Killed,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Active
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exited => "exited",
            Self::Killed => "killed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Signals a controller can send to a session's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Interrupt,
    Suspend,
    Eof,
    Term,
    Kill,
}

impl SignalKind {
    /// POSIX signal number; `None` for EOF, which is a write of Ctrl-D.
    fn to_raw(self) -> Option<i32> {
        match self {
            Self::Interrupt => Some(libc::SIGINT),
            Self::Suspend => Some(libc::SIGTSTP),
            Self::Term => Some(libc::SIGTERM),
            Self::Kill => Some(libc::SIGKILL),
            Self::Eof => None,
        }
    }
}

/// Tri-state newline handling for writes: `true`, `false`, or `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppendNewline {
    #[default]
    Auto,
    Always,
    Never,
}

impl<'de> Deserialize<'de> for AppendNewline {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(Self::Always),
            Raw::Flag(false) => Ok(Self::Never),
            Raw::Text(s) if s == "auto" => Ok(Self::Auto),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "expected true, false, or \"auto\", got {s:?}"
            ))),
        }
    }
}

/// Whether a write should get a CR appended.
///
/// `auto` appends exactly one CR when the input neither already ends in
/// CR/LF nor contains an embedded newline (multi-line pastes are passed
/// through untouched).
pub fn should_append_newline(input: &str, mode: AppendNewline) -> bool {
    match mode {
        AppendNewline::Never => false,
        AppendNewline::Always => true,
        AppendNewline::Auto => {
            !input.ends_with('\n') && !input.ends_with('\r') && !input.contains('\n')
        }
    }
}

/// Why a `wait_for_output` call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitReason {
    Idle,
    Timeout,
    Exited,
}

impl WaitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Timeout => "timeout",
            Self::Exited => "exited",
        }
    }
}

/// Everything needed to spawn one session. Built by the manager from
/// creation options plus configured defaults.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub name: String,
    pub shell: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    pub spinner_compact: bool,
    pub spinner_throttle_ms: u64,
    pub buffer_lines_cap: usize,
    pub buffer_bytes_cap: usize,
    pub idle_timeout_ms: u64,
}

#[derive(Debug)]
struct Lifecycle {
    status: SessionStatus,
    exit_code: Option<i32>,
    /// Terminal status to publish when the child's exit is observed; set by
    /// kill / idle-reap before they signal the child.
    pending: Option<SessionStatus>,
    /// Cause of an abnormal end (read-loop fault, wait error).
    fault: Option<String>,
}

/// Parameters for a buffer read through the session's post-filters.
#[derive(Debug)]
pub struct ReadRequest {
    pub since: u64,
    pub mode: ReadMode,
    pub limits: ReadLimits,
    /// `None` = session default.
    pub strip_spinner: Option<bool>,
    /// Keep only lines matching this pattern.
    pub filter: Option<Regex>,
}

/// Result of a session read.
#[derive(Debug, Serialize)]
pub struct ReadOutput {
    pub output: String,
    pub cursor: u64,
    pub has_more: bool,
    pub dropped_before: u64,
    pub dropped_bytes: u64,
    pub token_estimate: u64,
}

/// Result of a `wait_for_output`.
#[derive(Debug, Serialize)]
pub struct WaitOutput {
    pub output: String,
    pub cursor: u64,
    pub reason: WaitReason,
}

/// Point-in-time session counters for `stats_terminal`.
#[derive(Debug, Serialize)]
pub struct SessionStats {
    pub status: SessionStatus,
    pub pid: u32,
    pub uptime_ms: u64,
    pub bytes_retained: usize,
    pub lines_retained: usize,
    pub total_bytes_written: u64,
    pub total_bytes_produced: u64,
    pub alt_screen: bool,
    pub last_activity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// Summary row for `list_terminals`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub id: String,
    pub status: SessionStatus,
    pub pid: u32,
    pub shell: String,
    pub cwd: String,
    pub cols: u16,
    pub rows: u16,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub kind: SessionKind,
    pub stack_depth: u32,
    pub alt_screen: bool,
    pub last_activity: u64,
}

/// A live (or ended but still queryable) terminal session.
#[derive(Debug)]
pub struct Session {
    pub name: String,
    /// Opaque UI handle, derived deterministically from name + creation time.
    pub id: String,
    pub created_at_ms: u64,
    /// Order of creation within this manager, for stable listing.
    pub creation_index: u64,
    pub shell: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub pid: u32,
    pgid: u32,
    pub kind: SessionKind,
    pub idle_timeout_ms: u64,
    pub spinner_compact: bool,
    spinner_throttle_ms: u64,

    pub buffer: Arc<Mutex<OutputBuffer>>,
    lifecycle: Mutex<Lifecycle>,
    /// PTY master write half. Doubles as the per-session write lock that
    /// keeps hook-injected triples contiguous.
    writer: Mutex<tokio::fs::File>,
    /// Master fd kept alive for resize.
    master: OwnedFd,

    alt_screen: AtomicBool,
    stack: std::sync::Mutex<StackTracker>,
    geometry: std::sync::Mutex<(u16, u16)>,
    last_activity_ms: AtomicU64,
    pub total_bytes_written: AtomicU64,
    pub total_bytes_produced: AtomicU64,

    events: broadcast::Sender<Value>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Session {
    /// Allocate a PTY, spawn the child, and start the read-loop and exit
    /// watcher tasks. Spawn failures surface synchronously.
    pub fn spawn(
        spec: SessionSpec,
        creation_index: u64,
        events: broadcast::Sender<Value>,
    ) -> Result<Arc<Self>, HostError> {
        if !std::path::Path::new(&spec.cwd).is_dir() {
            return Err(HostError::SpawnFailed {
                cause: format!("working directory not found: {}", spec.cwd),
            });
        }

        let mut env = spec.env.clone();
        env.entry("TERM".to_string())
            .or_insert_with(|| "xterm-256color".to_string());

        let pair = pty::allocate_pty(spec.cols, spec.rows).map_err(|e| HostError::SpawnFailed {
            cause: format!("PTY allocation failed: {e}"),
        })?;
        let mut child = pty::spawn_child(&pair, &spec.shell, &spec.args, &spec.cwd, &env)
            .map_err(|e| HostError::SpawnFailed {
                cause: format!("{}: {e}", spec.shell),
            })?;
        let pid = child.id().unwrap_or(0);
        // The child called setsid(), so it leads its own process group.
        let pgid = pid;

        // Independent read and write handles on the master; the original fd
        // stays alive for resize.
        let master_raw: RawFd = pair.master.as_raw_fd();
        let writer_fd = unsafe { libc::dup(master_raw) };
        if writer_fd < 0 {
            return Err(HostError::SpawnFailed {
                cause: format!("dup() failed: {}", std::io::Error::last_os_error()),
            });
        }
        let reader_fd = unsafe { libc::dup(master_raw) };
        if reader_fd < 0 {
            unsafe {
                libc::close(writer_fd);
            }
            return Err(HostError::SpawnFailed {
                cause: format!("dup() failed: {}", std::io::Error::last_os_error()),
            });
        }
        // SAFETY: both fds were just dup'd and are exclusively owned here.
        let writer = tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(writer_fd) });
        let reader = tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(reader_fd) });

        let created_at_ms = now_ms();
        let session = Arc::new(Session {
            id: format!("{}-{created_at_ms:x}", spec.name),
            name: spec.name,
            created_at_ms,
            creation_index,
            kind: infer_kind(&spec.shell),
            shell: spec.shell,
            args: spec.args,
            cwd: spec.cwd,
            pid,
            pgid,
            idle_timeout_ms: spec.idle_timeout_ms,
            spinner_compact: spec.spinner_compact,
            spinner_throttle_ms: spec.spinner_throttle_ms,
            buffer: Arc::new(Mutex::new(OutputBuffer::new(
                spec.buffer_lines_cap,
                spec.buffer_bytes_cap,
            ))),
            lifecycle: Mutex::new(Lifecycle {
                status: SessionStatus::Active,
                exit_code: None,
                pending: None,
                fault: None,
            }),
            writer: Mutex::new(writer),
            master: pair.master,
            alt_screen: AtomicBool::new(false),
            stack: std::sync::Mutex::new(StackTracker::new()),
            geometry: std::sync::Mutex::new((spec.cols, spec.rows)),
            last_activity_ms: AtomicU64::new(created_at_ms),
            total_bytes_written: AtomicU64::new(0),
            total_bytes_produced: AtomicU64::new(0),
            events,
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        // Read loop: the only writer into this session's buffer.
        let read_task = tokio::spawn({
            let session = Arc::clone(&session);
            let mut reader = reader;
            async move {
                let mut scanner = ScreenScanner::new();
                let mut tmp = [0u8; 4096];
                loop {
                    match reader.read(&mut tmp).await {
                        Ok(0) => break,
                        Err(e) => {
                            // EIO is the normal PTY end-of-stream once the
                            // child side closes; anything else is a fault.
                            if e.raw_os_error() != Some(libc::EIO) {
                                session.record_fault(format!("read loop: {e}")).await;
                            }
                            break;
                        }
                        Ok(n) => {
                            let chunk = &tmp[..n];
                            session
                                .total_bytes_produced
                                .fetch_add(n as u64, Ordering::Relaxed);
                            session.touch_activity();
                            for event in scanner.scan(chunk) {
                                session.apply_screen_event(event);
                            }
                            session.buffer.lock().await.append(chunk);
                        }
                    }
                }
                debug!("terminal '{}': PTY output closed", session.name);
            }
        });

        // Exit watcher: publishes the one-shot terminal transition.
        let exit_task = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                let code = match child.wait().await {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        error!("terminal '{}': wait error: {e}", session.name);
                        session.record_fault(format!("wait: {e}")).await;
                        -1
                    }
                };
                let status = {
                    let mut lc = session.lifecycle.lock().await;
                    if lc.status == SessionStatus::Active {
                        lc.status = lc.pending.take().unwrap_or(SessionStatus::Exited);
                        lc.exit_code = Some(code);
                    }
                    lc.status
                };
                info!(
                    "terminal '{}' ended: {} (code {code})",
                    session.name,
                    status.as_str()
                );
                // Synthetic end-of-stream note: late readers see the exit in
                // the output itself, and the append wakes long-poll waiters.
                session
                    .buffer
                    .lock()
                    .await
                    .append(format!("\r\n[process exited with code {code}]\r\n").as_bytes());
                let _ = session.events.send(json!({
                    "terminalId": session.name,
                    "type": "exit",
                    "data": { "exitCode": code, "status": status.as_str() },
                }));
            }
        });

        session
            .tasks
            .lock()
            .expect("tasks mutex poisoned")
            .extend([read_task, exit_task]);

        Ok(session)
    }

    pub async fn status(&self) -> SessionStatus {
        self.lifecycle.lock().await.status
    }

    pub async fn exit_code(&self) -> Option<i32> {
        self.lifecycle.lock().await.exit_code
    }

    async fn record_fault(&self, cause: String) {
        let mut lc = self.lifecycle.lock().await;
        if lc.fault.is_none() {
            lc.fault = Some(cause);
        }
    }

    fn touch_activity(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    /// Milliseconds since the last write or PTY output.
    pub fn idle_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_activity_ms.load(Ordering::Relaxed))
    }

    pub fn alt_screen(&self) -> bool {
        self.alt_screen.load(Ordering::Relaxed)
    }

    pub fn stack_depth(&self) -> u32 {
        self.stack.lock().expect("stack mutex poisoned").depth()
    }

    fn apply_screen_event(&self, event: ScreenEvent) {
        let entered = event == ScreenEvent::AltScreenEnter;
        self.alt_screen.store(entered, Ordering::Relaxed);
        self.broadcast_session_mode();
    }

    fn broadcast_session_mode(&self) {
        let _ = self.events.send(json!({
            "terminalId": self.name,
            "type": "session_mode",
            "data": {
                "sessionKind": self.kind.as_str(),
                "sessionStackDepth": self.stack_depth(),
                "altScreen": self.alt_screen(),
            },
        }));
    }

    /// Write controller input through the hook pipeline to the PTY.
    ///
    /// Returns hook annotation text for the caller's reply, if any matched.
    /// The bytes are committed to the PTY before this returns.
    pub async fn write(
        &self,
        input: &str,
        newline: AppendNewline,
        special: Option<SpecialKey>,
        hooks: &HookEngine,
    ) -> Result<Option<String>, HostError> {
        if self.status().await.is_terminal() {
            return Err(HostError::SessionTerminated(self.name.clone()));
        }

        if let Some(key) = special {
            self.write_parts(&[key.bytes()]).await?;
            return Ok(None);
        }

        let plan = hooks.evaluate(&self.name, input)?;

        let mut parts: Vec<Vec<u8>> = Vec::new();
        for cmd in &plan.pre {
            parts.push(format!("{cmd}\r").into_bytes());
        }
        let mut user = input.as_bytes().to_vec();
        if should_append_newline(input, newline) {
            user.push(b'\r');
        }
        parts.push(user);
        for cmd in &plan.post {
            parts.push(format!("{cmd}\r").into_bytes());
        }
        let refs: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
        self.write_parts(&refs).await?;

        if self.stack.lock().expect("stack mutex poisoned").observe(input) {
            self.broadcast_session_mode();
        }

        if plan.annotations.is_empty() {
            Ok(None)
        } else {
            Ok(Some(plan.annotations.join("\n")))
        }
    }

    /// Write byte groups to the PTY under the session write lock.
    ///
    /// Holding the writer mutex across all parts is what makes a
    /// prefix/user/suffix triple atomic with respect to concurrent writers.
    /// Oversized parts are chunked; a caller's logical unit below the chunk
    /// threshold is never split.
    async fn write_parts(&self, parts: &[&[u8]]) -> Result<(), HostError> {
        let mut writer = self.writer.lock().await;
        for part in parts {
            for chunk in pty::chunked(part) {
                if let Err(e) = writer.write_all(chunk).await {
                    return Err(self.write_error(e).await);
                }
                self.total_bytes_written
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
            }
        }
        writer
            .flush()
            .await
            .map_err(|e| HostError::Internal(format!("PTY flush: {e}")))?;
        self.touch_activity();
        Ok(())
    }

    async fn write_error(&self, e: std::io::Error) -> HostError {
        if self.status().await.is_terminal() {
            HostError::SessionTerminated(self.name.clone())
        } else {
            HostError::Internal(format!("PTY write: {e}"))
        }
    }

    /// Read from the buffer through the session's post-filters.
    pub async fn read(&self, req: ReadRequest) -> ReadOutput {
        let result = self.buffer.lock().await.read(req.since, req.mode, req.limits);
        let strip = req.strip_spinner.unwrap_or(self.spinner_compact);
        let bytes = if strip {
            spinner::compact(&result.bytes, self.spinner_throttle_ms)
        } else {
            result.bytes
        };
        let mut output = String::from_utf8_lossy(&bytes).into_owned();
        if let Some(re) = &req.filter {
            output = output
                .lines()
                .filter(|l| re.is_match(l))
                .fold(String::new(), |mut acc, l| {
                    acc.push_str(l);
                    acc.push('\n');
                    acc
                });
        }
        let token_estimate = estimate_tokens(&output);
        ReadOutput {
            output,
            cursor: result.next_cursor,
            has_more: result.has_more,
            dropped_before: result.dropped_lines,
            dropped_bytes: result.dropped_bytes,
            token_estimate,
        }
    }

    /// Wait until output goes quiet, the timeout elapses, or the session
    /// ends — whichever comes first. Resolves exactly once.
    ///
    /// `since` defaults to the buffer tail at entry, i.e. "whatever the
    /// child prints from now on".
    pub async fn wait_for_output(
        &self,
        since: Option<u64>,
        idle_ms: u64,
        overall_timeout_ms: u64,
    ) -> WaitOutput {
        let overall_deadline =
            tokio::time::Instant::now() + Duration::from_millis(overall_timeout_ms);
        let idle = Duration::from_millis(idle_ms.max(1));
        let mut cursor = match since {
            Some(c) => c,
            None => self.buffer.lock().await.tail_seq(),
        };
        let mut collected: Vec<u8> = Vec::new();

        let reason = loop {
            // Drain everything currently available.
            let notify = {
                let buf = self.buffer.lock().await;
                if buf.has_data_since(cursor) {
                    let r = buf.read(
                        cursor,
                        ReadMode::Full { backward: false },
                        ReadLimits {
                            max_lines: 0,
                            max_bytes: 0,
                        },
                    );
                    collected.extend_from_slice(&r.bytes);
                    cursor = r.next_cursor;
                    continue;
                }
                buf.notifier()
            };

            if self.status().await.is_terminal() {
                break WaitReason::Exited;
            }

            // Register interest before the final data re-check so an append
            // between the check and the select cannot be missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.buffer.lock().await.has_data_since(cursor) {
                continue;
            }

            let now = tokio::time::Instant::now();
            if now >= overall_deadline {
                break WaitReason::Timeout;
            }
            let sleep_until = (now + idle).min(overall_deadline);
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(sleep_until) => {
                    if sleep_until >= overall_deadline {
                        break WaitReason::Timeout;
                    }
                    break WaitReason::Idle;
                }
            }
        };

        let bytes = if self.spinner_compact {
            spinner::compact(&collected, self.spinner_throttle_ms)
        } else {
            collected
        };
        WaitOutput {
            output: String::from_utf8_lossy(&bytes).into_owned(),
            cursor,
            reason,
        }
    }

    /// Resize the PTY. Fails on a terminal session.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), HostError> {
        if self.status().await.is_terminal() {
            return Err(HostError::SessionTerminated(self.name.clone()));
        }
        pty::resize_pty(&self.master, cols, rows)
            .map_err(|e| HostError::Internal(format!("resize: {e}")))?;
        *self.geometry.lock().expect("geometry mutex poisoned") = (cols, rows);
        Ok(())
    }

    /// Deliver a signal to the child's process group. No-op on a terminal
    /// session.
    pub async fn signal(&self, kind: SignalKind) -> Result<(), HostError> {
        if self.status().await.is_terminal() {
            return Ok(());
        }
        match kind.to_raw() {
            None => self.write_parts(&[CTRL_D]).await,
            Some(sig) => self.raw_signal(sig),
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn raw_signal(&self, sig: i32) -> Result<(), HostError> {
        let pgid = self.pgid as i32;
        if pgid <= 0 {
            return Err(HostError::Internal("no process group".to_string()));
        }
        // kill(-pgid, sig) delivers to every process in the group
        let ret = unsafe { libc::kill(-pgid, sig) };
        if ret == 0 {
            Ok(())
        } else {
            Err(HostError::Internal(format!(
                "kill(-{pgid}, {sig}) failed: {}",
                std::io::Error::last_os_error()
            )))
        }
    }

    /// Terminate the session: record the intended terminal status, SIGTERM
    /// the group, escalate to SIGKILL after the grace period. Idempotent.
    pub async fn terminate(&self, reason: SessionStatus) {
        {
            let mut lc = self.lifecycle.lock().await;
            if lc.status.is_terminal() {
                return;
            }
            lc.pending = Some(reason);
        }
        let _ = self.raw_signal(libc::SIGTERM);

        let deadline = tokio::time::Instant::now() + KILL_GRACE;
        loop {
            if self.status().await.is_terminal() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = self.raw_signal(libc::SIGKILL);
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Immediate SIGKILL termination, still published as `killed`.
    pub async fn terminate_now(&self) {
        {
            let mut lc = self.lifecycle.lock().await;
            if lc.status.is_terminal() {
                return;
            }
            lc.pending = Some(SessionStatus::Killed);
        }
        let _ = self.raw_signal(libc::SIGKILL);
    }

    /// Abort the background tasks. Called when the session is forgotten or
    /// the manager shuts down; the PTY fds close when the session drops.
    pub fn abort_tasks(&self) {
        for task in self.tasks.lock().expect("tasks mutex poisoned").iter() {
            task.abort();
        }
    }

    pub async fn summary(&self) -> SessionSummary {
        let (status, exit_code) = {
            let lc = self.lifecycle.lock().await;
            (lc.status, lc.exit_code)
        };
        let (cols, rows) = *self.geometry.lock().expect("geometry mutex poisoned");
        SessionSummary {
            name: self.name.clone(),
            id: self.id.clone(),
            status,
            pid: self.pid,
            shell: self.shell.clone(),
            cwd: self.cwd.clone(),
            cols,
            rows,
            created_at: self.created_at_ms,
            exit_code,
            kind: self.kind,
            stack_depth: self.stack_depth(),
            alt_screen: self.alt_screen(),
            last_activity: self.last_activity_ms.load(Ordering::Relaxed),
        }
    }

    pub async fn stats(&self) -> SessionStats {
        let (status, exit_code, fault) = {
            let lc = self.lifecycle.lock().await;
            (lc.status, lc.exit_code, lc.fault.clone())
        };
        let (bytes_retained, lines_retained) = {
            let buf = self.buffer.lock().await;
            (buf.retained_bytes(), buf.retained_lines())
        };
        SessionStats {
            status,
            pid: self.pid,
            uptime_ms: now_ms().saturating_sub(self.created_at_ms),
            bytes_retained,
            lines_retained,
            total_bytes_written: self.total_bytes_written.load(Ordering::Relaxed),
            total_bytes_produced: self.total_bytes_produced.load(Ordering::Relaxed),
            alt_screen: self.alt_screen(),
            last_activity: self.last_activity_ms.load(Ordering::Relaxed),
            exit_code,
            fault,
        }
    }
}
