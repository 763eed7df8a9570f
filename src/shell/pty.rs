//! PTY allocation, child spawning, and terminal resize.
//!
//! Uses the `nix` crate for POSIX PTY APIs. The PTY master fd stays alive
//! for the whole session so writes, reads, and resizes can be performed on
//! it long after the creating request has gone away.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Stdio;

use nix::pty::{openpty, OpenptyResult, Winsize};
use tokio::process::{Child, Command};

/// Writes larger than this are split into sequential chunks so a single
/// oversized paste cannot overflow the kernel's tty input queue. Chunk
/// boundaries never split a caller's smaller-than-threshold logical unit.
pub const WRITE_CHUNK_BYTES: usize = 4096;

/// An allocated PTY pair (master + slave).
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Allocate a PTY pair with the given geometry.
pub fn allocate_pty(cols: u16, rows: u16) -> Result<PtyPair, nix::Error> {
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let OpenptyResult { master, slave } = openpty(&winsize, None)?;
    Ok(PtyPair { master, slave })
}

/// Spawn a shell (or any program) on the slave side of the PTY.
///
/// The child becomes a session leader with the PTY slave as its controlling
/// terminal; stdin/stdout/stderr are all connected to the slave fd. When
/// `args` is empty the program is started as a login shell (`-l`) so rc
/// files are sourced, matching what a desktop terminal emulator does.
pub fn spawn_child(
    pty: &PtyPair,
    program: &str,
    args: &[String],
    working_dir: &str,
    env: &HashMap<String, String>,
) -> std::io::Result<Child> {
    let slave_fd = pty.slave.as_raw_fd();
    let mut cmd = Command::new(program);
    if args.is_empty() {
        cmd.arg("-l");
    } else {
        cmd.args(args);
    }
    cmd.current_dir(working_dir).kill_on_drop(true);

    // Stdio is wired up by pre_exec (dup2 to the PTY slave), so tell tokio
    // not to set up pipes of its own.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    cmd.envs(env);

    // SAFETY: all syscalls used here are async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(move || {
            // New session; the child is the session (and process group) leader
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Make the PTY slave the controlling terminal
            if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            libc::dup2(slave_fd, 0);
            libc::dup2(slave_fd, 1);
            libc::dup2(slave_fd, 2);
            if slave_fd > 2 {
                libc::close(slave_fd);
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Resize the PTY's window.
pub fn resize_pty(master: &OwnedFd, cols: u16, rows: u16) -> Result<(), nix::Error> {
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCSWINSZ is a well-defined ioctl that reads a Winsize struct.
    let ret = unsafe {
        libc::ioctl(
            master.as_raw_fd(),
            libc::TIOCSWINSZ,
            std::ptr::addr_of!(winsize),
        )
    };
    if ret == -1 {
        Err(nix::Error::last())
    } else {
        Ok(())
    }
}

/// Split a write into `WRITE_CHUNK_BYTES`-sized pieces, preserving order.
pub fn chunked(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes.chunks(WRITE_CHUNK_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_preserves_content_and_order() {
        let data: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        let rejoined: Vec<u8> = chunked(&data).flatten().copied().collect();
        assert_eq!(rejoined, data);
    }

    #[test]
    fn small_writes_are_a_single_chunk() {
        let data = b"echo hi\r";
        let chunks: Vec<&[u8]> = chunked(data).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], data);
    }
}
