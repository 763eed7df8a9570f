//! Session-kind and shell-stack heuristics.
//!
//! Both values are advisory metadata for the UI (badge + breadcrumb). They
//! are inferred from command strings, never from output, and never affect
//! routing: a `remote` session is still driven through the same local PTY.

use serde::Serialize;

/// Advisory label for where a session's shell actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Local,
    Remote,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Infer the session kind from the program a session was created with.
pub fn infer_kind(program: &str) -> SessionKind {
    let name = program.rsplit('/').next().unwrap_or(program);
    match name {
        "ssh" | "mosh" | "mosh-client" | "et" | "telnet" => SessionKind::Remote,
        _ => SessionKind::Local,
    }
}

/// Programs that start a nested shell when typed at a prompt.
const NESTING_PROGRAMS: &[&str] = &["ssh", "mosh", "wsl", "wsl.exe", "docker", "podman", "su"];

/// Tracks how deep the user has descended into nested shells.
///
/// Watches written commands only: `ssh host` bumps the depth, `exit` /
/// `logout` pops it. This is a heuristic — a failed `ssh` still bumps the
/// counter until the next `exit` — which is fine for advisory UI state.
#[derive(Debug, Default)]
pub struct StackTracker {
    depth: u32,
}

impl StackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Observe one written command line. Returns `true` if the depth changed.
    pub fn observe(&mut self, command: &str) -> bool {
        let trimmed = command.trim();
        let Some(first) = trimmed.split_whitespace().next() else {
            return false;
        };
        let name = first.rsplit('/').next().unwrap_or(first);

        if NESTING_PROGRAMS.contains(&name) {
            // `docker ps` doesn't nest; only the interactive subcommands do.
            if name == "docker" || name == "podman" {
                let nested = trimmed.split_whitespace().nth(1).is_some_and(|sub| {
                    sub == "exec" || sub == "run" || sub == "attach"
                });
                if !nested {
                    return false;
                }
            }
            self.depth = self.depth.saturating_add(1);
            return true;
        }

        if (name == "exit" || name == "logout") && self.depth > 0 {
            self.depth -= 1;
            return true;
        }
        false
    }
}
