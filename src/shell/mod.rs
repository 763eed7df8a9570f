//! PTY plumbing for terminal sessions.
//!
//! - [`pty`] — PTY allocation, child spawn (setsid + controlling tty), resize.
//! - [`keys`] — canonical special-key byte sequences.
//! - [`detect_shells`] — enumerate usable login shells for the UI's shell
//!   picker.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub mod keys;
pub mod pty;

/// Detect available shells on this system.
///
/// Reads `/etc/shells` first (filtering comments and blank lines), then
/// falls back to probing a hardcoded list of common paths. Results are
/// deduplicated by canonical path (so `/bin/bash` and `/usr/bin/bash` don't
/// both appear when one is a symlink) and sorted by preference:
/// zsh > fish > bash > dash > ash > sh.
pub fn detect_shells() -> Vec<String> {
    let candidates = if let Ok(contents) = std::fs::read_to_string("/etc/shells") {
        let from_file: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter(|l| Path::new(l).exists())
            .map(ToString::to_string)
            .collect();
        if from_file.is_empty() {
            fallback_candidates()
        } else {
            from_file
        }
    } else {
        fallback_candidates()
    };

    let mut seen = HashSet::new();
    let mut shells: Vec<String> = candidates
        .into_iter()
        .filter(|p| {
            let canonical = std::fs::canonicalize(p).unwrap_or_else(|_| PathBuf::from(p));
            seen.insert(canonical)
        })
        .collect();

    shells.sort_by_key(|s| shell_rank(s));
    shells
}

fn fallback_candidates() -> Vec<String> {
    [
        "/bin/sh",
        "/bin/bash",
        "/bin/zsh",
        "/bin/ash",
        "/bin/dash",
        "/usr/bin/fish",
        "/usr/bin/zsh",
        "/usr/bin/bash",
    ]
    .iter()
    .filter(|p| Path::new(p).exists())
    .map(|p| (*p).to_string())
    .collect()
}

fn shell_rank(path: &str) -> u8 {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name {
        "zsh" => 0,
        "fish" => 1,
        "bash" => 2,
        "dash" => 3,
        "ash" => 4,
        "sh" => 5,
        _ => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detected_shells_exist_and_are_unique() {
        let shells = detect_shells();
        let mut seen = HashSet::new();
        for s in &shells {
            assert!(Path::new(s).exists(), "{s} does not exist");
            assert!(seen.insert(s.clone()), "{s} listed twice");
        }
    }

    #[test]
    fn ranking_prefers_zsh_over_sh() {
        assert!(shell_rank("/bin/zsh") < shell_rank("/bin/sh"));
        assert!(shell_rank("/usr/bin/fish") < shell_rank("/bin/bash"));
    }
}
