//! Spinner-frame compaction for terminal progress animations.
//!
//! CLI tools animate progress by rewriting one line over and over with CR
//! (or a cursor-to-column-1 sequence): `⠋\r⠙\r⠹\r…`. Streamed raw to an AI
//! controller this is pure noise — hundreds of near-identical frames that
//! burn context tokens. The compactor collapses a run of consecutive frames
//! into the newest frame plus a suppressed-frame count, while passing every
//! real log line through untouched.
//!
//! The transform is byte-in/byte-out with per-instance state:
//!
//! - A segment is the bytes since the last CR / CHA / newline boundary.
//! - A CR-terminated segment whose first visible character (after
//!   stripping ANSI escapes) is in the animation alphabet, arriving within
//!   the throttle interval of the previous frame, replaces the held frame
//!   and bumps the suppressed count.
//! - A non-frame segment on the same line flushes the held frame (with a
//!   ` [+N frames]` suffix when frames were dropped) and resumes
//!   passthrough.
//! - A newline always flushes and resets line state.
//!
//! The output is a fixpoint: feeding compacted output through a second
//! compactor reproduces it byte for byte.

use std::time::{Duration, Instant};

/// Rotating glyph alphabets beyond the braille block.
const ROTATING_GLYPHS: &str = "◐◓◑◒◴◵◶◷◜◠◝◞◡◟▖▘▝▗▁▂▃▄▅▆▇█";

/// Escape sequences longer than this cannot be spinner dressing; flushed raw.
const MAX_ESCAPE_LEN: usize = 128;

fn is_spinner_char(c: char) -> bool {
    ('\u{2800}'..='\u{28ff}').contains(&c) || ROTATING_GLYPHS.contains(c)
}

/// Stateful spinner compactor. One instance per compacted stream.
pub struct SpinnerCompactor {
    throttle: Duration,
    /// Bytes of the current segment since the last boundary.
    seg: Vec<u8>,
    /// In-progress escape sequence, if the last byte left us inside one.
    esc: Vec<u8>,
    /// Newest spinner frame awaiting flush.
    held: Option<Vec<u8>>,
    /// Frames dropped since the held frame chain started.
    suppressed: u64,
    last_frame_at: Option<Instant>,
}

impl SpinnerCompactor {
    pub fn new(throttle_ms: u64) -> Self {
        Self {
            throttle: Duration::from_millis(throttle_ms),
            seg: Vec::new(),
            esc: Vec::new(),
            held: None,
            suppressed: 0,
            last_frame_at: None,
        }
    }

    /// Feed a chunk, stamping segment arrivals with `now`. Returns the bytes
    /// to pass downstream.
    pub fn feed(&mut self, bytes: &[u8], now: Instant) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len());
        for &b in bytes {
            if !self.esc.is_empty() {
                self.esc.push(b);
                if let Some(complete) = self.escape_complete() {
                    let esc = std::mem::take(&mut self.esc);
                    if complete && is_cursor_rewind(&esc) {
                        // Column-1 rewind acts exactly like CR
                        self.end_segment(&esc, now, &mut out);
                    } else {
                        self.seg.extend_from_slice(&esc);
                    }
                }
                continue;
            }
            match b {
                0x1b => self.esc.push(b),
                b'\r' => self.end_segment(b"\r", now, &mut out),
                b'\n' => {
                    self.flush_held(&mut out);
                    out.append(&mut self.seg);
                    out.push(b'\n');
                    self.last_frame_at = None;
                }
                _ => self.seg.push(b),
            }
        }
        out
    }

    /// Flush everything still buffered (held frame + partial segment).
    ///
    /// Call at end of stream or end of a read window — the "phantom flush"
    /// that makes the compacted stream render to the same final state.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        if !self.esc.is_empty() {
            let esc = std::mem::take(&mut self.esc);
            self.seg.extend_from_slice(&esc);
        }
        self.flush_held(&mut out);
        out.append(&mut self.seg);
        out
    }

    /// A completed CR (or rewind) boundary: classify the segment and either
    /// hold it as a frame or pass it through.
    fn end_segment(&mut self, boundary: &[u8], now: Instant, out: &mut Vec<u8>) {
        let seg = std::mem::take(&mut self.seg);
        if self.is_frame(&seg) {
            let within = self
                .last_frame_at
                .is_some_and(|t| now.duration_since(t) <= self.throttle);
            if let Some(prev) = self.held.take() {
                if within {
                    self.suppressed += 1;
                } else {
                    self.emit_frame(prev, out);
                }
            }
            self.held = Some(seg);
            self.last_frame_at = Some(now);
        } else {
            self.flush_held(out);
            out.extend_from_slice(&seg);
            out.extend_from_slice(boundary);
        }
    }

    fn is_frame(&self, seg: &[u8]) -> bool {
        let visible = strip_ansi(seg);
        visible
            .trim_start()
            .chars()
            .next()
            .is_some_and(is_spinner_char)
    }

    fn flush_held(&mut self, out: &mut Vec<u8>) {
        if let Some(frame) = self.held.take() {
            self.emit_frame(frame, out);
        }
    }

    fn emit_frame(&mut self, frame: Vec<u8>, out: &mut Vec<u8>) {
        out.extend_from_slice(&frame);
        if self.suppressed > 0 {
            out.extend_from_slice(format!(" [+{} frames]", self.suppressed).as_bytes());
            self.suppressed = 0;
        }
        out.push(b'\r');
    }

    /// Returns `Some(valid)` when the accumulated escape sequence is
    /// complete (or abandoned as oversized), `None` while still partial.
    fn escape_complete(&self) -> Option<bool> {
        if self.esc.len() >= MAX_ESCAPE_LEN {
            return Some(false);
        }
        match self.esc.get(1) {
            None => None,
            Some(b'[') => {
                // CSI: params then a final byte in 0x40..=0x7e
                let Some(&last) = self.esc.last() else {
                    return None;
                };
                if self.esc.len() > 2 && (0x40..=0x7e).contains(&last) {
                    Some(true)
                } else {
                    None
                }
            }
            Some(b']') => {
                // OSC: terminated by BEL or ST (ESC \)
                let last = *self.esc.last().unwrap_or(&0);
                if last == 0x07 || (self.esc.len() > 3 && self.esc.ends_with(b"\x1b\\")) {
                    Some(true)
                } else {
                    None
                }
            }
            // Two-byte escape (ESC c, ESC 7, ...)
            Some(_) => Some(true),
        }
    }
}

/// `CSI G` / `CSI 1 G` / `CSI 0 G` — cursor to column 1, a CR equivalent.
fn is_cursor_rewind(esc: &[u8]) -> bool {
    if esc.len() < 3 || esc[1] != b'[' || esc.last() != Some(&b'G') {
        return false;
    }
    let params = &esc[2..esc.len() - 1];
    params.is_empty() || params == b"1" || params == b"0"
}

/// Remove ANSI escape sequences, keeping visible text.
fn strip_ansi(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x1b {
            i += 1;
            match bytes.get(i) {
                Some(b'[') => {
                    i += 1;
                    while i < bytes.len() && !(0x40..=0x7e).contains(&bytes[i]) {
                        i += 1;
                    }
                    i += 1; // final byte
                }
                Some(b']') => {
                    while i < bytes.len() && bytes[i] != 0x07 {
                        i += 1;
                    }
                    i += 1; // BEL
                }
                Some(_) => i += 1,
                None => {}
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// One-shot compaction of a stored window (read path).
///
/// Stored output has no arrival timing left, so adjacent frames are treated
/// as within-throttle — which is what they were when a live animation
/// produced them.
pub fn compact(bytes: &[u8], throttle_ms: u64) -> Vec<u8> {
    let mut c = SpinnerCompactor::new(throttle_ms);
    let now = Instant::now();
    let mut out = c.feed(bytes, now);
    out.extend(c.finish());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact_str(input: &str) -> String {
        String::from_utf8_lossy(&compact(input.as_bytes(), 100)).into_owned()
    }

    #[test]
    fn braille_run_collapses_to_newest_frame() {
        let out = compact_str("⠋\r⠙\r⠹\r⠸\rdone\n");
        assert_eq!(out, "⠸ [+3 frames]\rdone\n");
    }

    #[test]
    fn single_frame_passes_unchanged() {
        assert_eq!(compact_str("⠋\rdone\n"), "⠋\rdone\n");
    }

    #[test]
    fn plain_text_is_untouched() {
        let input = "compiling foo v0.1.0\n   done in 2.3s\n";
        assert_eq!(compact_str(input), input);
    }

    #[test]
    fn crlf_line_endings_are_preserved() {
        assert_eq!(compact_str("one\r\ntwo\r\n"), "one\r\ntwo\r\n");
    }

    #[test]
    fn real_lines_between_frames_survive() {
        let out = compact_str("⠋\rstep one ok\n⠙\r⠹\rdone\n");
        assert_eq!(out, "⠋\rstep one ok\n⠹ [+1 frames]\rdone\n");
    }

    #[test]
    fn rotating_glyphs_collapse() {
        let out = compact_str("◐\r◓\r◑\r◒\rready\n");
        assert_eq!(out, "◒ [+3 frames]\rready\n");
    }

    #[test]
    fn ansi_dressed_frames_are_recognized() {
        let out = compact_str("\x1b[36m⠋\x1b[0m building\r\x1b[36m⠙\x1b[0m building\rok\n");
        assert_eq!(out, "\x1b[36m⠙\x1b[0m building [+1 frames]\rok\n");
    }

    #[test]
    fn cursor_column_rewind_acts_as_cr() {
        let out = compact_str("⠋\x1b[G⠙\x1b[G⠹\x1b[Gdone\n");
        assert_eq!(out, "⠹ [+2 frames]\rdone\n");
    }

    #[test]
    fn slow_frames_are_not_collapsed() {
        let mut c = SpinnerCompactor::new(50);
        let t0 = Instant::now();
        let mut out = c.feed("⠋\r".as_bytes(), t0);
        // Next frame arrives well past the throttle window
        out.extend(c.feed("⠙\r".as_bytes(), t0 + Duration::from_millis(500)));
        out.extend(c.feed(b"done\n", t0 + Duration::from_millis(510)));
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains('⠋'), "early frame must survive: {text:?}");
        assert!(text.contains('⠙'), "late frame must survive: {text:?}");
        assert!(!text.contains("frames]"), "nothing was suppressed: {text:?}");
    }

    #[test]
    fn compaction_is_a_fixpoint() {
        let inputs = [
            "⠋\r⠙\r⠹\r⠸\rdone\n",
            "⠋\rstep one ok\n⠙\r⠹\rdone\n",
            "plain\nlines\nonly\n",
            "◐\r◓\rmixed ◑ text\n",
            "trailing partial",
        ];
        for input in inputs {
            let once = compact(input.as_bytes(), 100);
            let twice = compact(&once, 100);
            assert_eq!(once, twice, "not a fixpoint for {input:?}");
        }
    }

    #[test]
    fn partial_line_is_flushed_by_finish() {
        let mut c = SpinnerCompactor::new(100);
        let mut out = c.feed("⠋\r⠙\r$ waiting".as_bytes(), Instant::now());
        out.extend(c.finish());
        let text = String::from_utf8_lossy(&out);
        assert_eq!(text, "⠙ [+1 frames]\r$ waiting");
    }

    #[test]
    fn escape_split_across_feeds_is_reassembled() {
        let mut c = SpinnerCompactor::new(100);
        let now = Instant::now();
        let mut out = c.feed(b"\x1b[3", now);
        out.extend(c.feed("6m⠋\x1b[0m\rok\n".as_bytes(), now));
        assert_eq!(String::from_utf8_lossy(&out), "\x1b[36m⠋\x1b[0m\rok\n");
    }

    #[test]
    fn frame_count_suffix_survives_recompaction() {
        let once = compact("⠋\r⠙\r⠹\rdone\n".as_bytes(), 100);
        let text = String::from_utf8_lossy(&once);
        assert_eq!(text, "⠹ [+2 frames]\rdone\n");
        assert_eq!(compact(&once, 100), once);
    }
}
