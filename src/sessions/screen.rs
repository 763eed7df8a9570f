//! Incremental scanner for alternate-screen mode switches.
//!
//! Full-screen programs (editors, pagers, TUIs) switch to the alternate
//! screen buffer with `CSI ? 1049 h` (or the older 1047/47 variants) and
//! back with the matching `l`. The read loop feeds every output chunk
//! through this scanner and flips the session's alt-screen flag on the
//! resulting events; `wait_for_output` heuristics and the UI consume the
//! flag.
//!
//! This is deliberately a tiny recognizer for one closed set of CSI
//! sequences, not a VT emulator. It carries state across chunks so a
//! sequence split between two PTY reads is still recognized.

/// Alternate-screen transitions observed in an output chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenEvent {
    AltScreenEnter,
    AltScreenExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Ground,
    /// Saw ESC, waiting for `[`.
    Escape,
    /// Inside a CSI sequence, accumulating parameter bytes.
    Csi { private: bool },
}

/// Stateful scanner; one instance per session read loop.
#[derive(Debug)]
pub struct ScreenScanner {
    state: ScanState,
    params: String,
}

/// Parameter strings are short (`1049`, `1049;1`); anything longer than
/// this is not a sequence we care about and is abandoned.
const MAX_PARAMS_LEN: usize = 32;

impl ScreenScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::Ground,
            params: String::new(),
        }
    }

    /// Scan a chunk of PTY output, returning any mode transitions in order.
    pub fn scan(&mut self, bytes: &[u8]) -> Vec<ScreenEvent> {
        let mut events = Vec::new();
        for &b in bytes {
            match self.state {
                ScanState::Ground => {
                    if b == 0x1b {
                        self.state = ScanState::Escape;
                    }
                }
                ScanState::Escape => {
                    if b == b'[' {
                        self.state = ScanState::Csi { private: false };
                        self.params.clear();
                    } else if b == 0x1b {
                        // ESC ESC — stay armed for a following '['
                    } else {
                        self.state = ScanState::Ground;
                    }
                }
                ScanState::Csi { private } => match b {
                    b'?' if self.params.is_empty() && !private => {
                        self.state = ScanState::Csi { private: true };
                    }
                    b'0'..=b'9' | b';' => {
                        if self.params.len() < MAX_PARAMS_LEN {
                            self.params.push(b as char);
                        } else {
                            self.state = ScanState::Ground;
                        }
                    }
                    b'h' | b'l' if private => {
                        if self.params_select_alt_screen() {
                            events.push(if b == b'h' {
                                ScreenEvent::AltScreenEnter
                            } else {
                                ScreenEvent::AltScreenExit
                            });
                        }
                        self.state = ScanState::Ground;
                    }
                    _ => {
                        // Any other final or intermediate byte ends the
                        // sequence as far as we are concerned.
                        self.state = ScanState::Ground;
                    }
                },
            }
        }
        events
    }

    fn params_select_alt_screen(&self) -> bool {
        self.params
            .split(';')
            .any(|p| matches!(p, "1049" | "1047" | "47"))
    }
}

impl Default for ScreenScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_smcup_and_rmcup() {
        let mut s = ScreenScanner::new();
        assert_eq!(s.scan(b"\x1b[?1049h"), vec![ScreenEvent::AltScreenEnter]);
        assert_eq!(s.scan(b"\x1b[?1049l"), vec![ScreenEvent::AltScreenExit]);
    }

    #[test]
    fn detects_legacy_variants() {
        let mut s = ScreenScanner::new();
        assert_eq!(s.scan(b"\x1b[?1047h"), vec![ScreenEvent::AltScreenEnter]);
        assert_eq!(s.scan(b"\x1b[?47l"), vec![ScreenEvent::AltScreenExit]);
    }

    #[test]
    fn sequence_split_across_chunks() {
        let mut s = ScreenScanner::new();
        assert!(s.scan(b"before \x1b[?10").is_empty());
        assert_eq!(s.scan(b"49h after"), vec![ScreenEvent::AltScreenEnter]);
    }

    #[test]
    fn ignores_unrelated_csi() {
        let mut s = ScreenScanner::new();
        assert!(s.scan(b"\x1b[2J\x1b[H\x1b[31mred\x1b[0m").is_empty());
        assert!(s.scan(b"\x1b[?25l\x1b[?25h").is_empty()); // cursor hide/show
        assert!(s.scan(b"\x1b[1049h").is_empty()); // not a private mode
    }

    #[test]
    fn multi_param_sequences_match() {
        let mut s = ScreenScanner::new();
        assert_eq!(
            s.scan(b"\x1b[?1049;1h"),
            vec![ScreenEvent::AltScreenEnter]
        );
    }

    #[test]
    fn events_keep_stream_order() {
        let mut s = ScreenScanner::new();
        let events = s.scan(b"\x1b[?1049hvim stuff\x1b[?1049l$ ");
        assert_eq!(
            events,
            vec![ScreenEvent::AltScreenEnter, ScreenEvent::AltScreenExit]
        );
    }

    #[test]
    fn oversized_params_are_abandoned() {
        let mut s = ScreenScanner::new();
        let mut seq = b"\x1b[?".to_vec();
        seq.extend(std::iter::repeat_n(b'1', 100));
        seq.push(b'h');
        assert!(s.scan(&seq).is_empty());
        // Scanner recovered and still works
        assert_eq!(s.scan(b"\x1b[?1049h"), vec![ScreenEvent::AltScreenEnter]);
    }
}
