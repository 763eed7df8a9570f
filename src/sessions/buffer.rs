//! Cursor-addressable output buffer with bounded retention and live fan-out.
//!
//! [`OutputBuffer`] absorbs the unbounded byte stream of one PTY read loop,
//! keeps the most recent window under two independent caps (lines and
//! bytes), and answers cursor-based read queries. The cursor space is byte
//! offsets into the session's whole output history: it starts at 0, never
//! repeats, and survives eviction — a reader holding a stale cursor is told
//! how much was dropped and resumes at the oldest retained byte.
//!
//! Live consumers register bounded forward queues via [`OutputBuffer::subscribe`].
//! Appends `try_send` into each queue; a full queue drops that subscriber
//! with an overflow flag so a slow WebSocket can never stall the PTY read
//! loop. Long-poll waiters ([`wait_for_output`](crate::sessions::session::Session::wait_for_output))
//! park on the shared [`Notify`] instead.
//!
//! The buffer is line-segmented internally: bytes accumulate into the open
//! tail line until a `\n` (or a force-split at [`LINE_SPLIT_BYTES`], so one
//! pathological line cannot defeat the byte cap). Eviction pops whole lines
//! from the head; the open tail line is never evicted.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::util::now_ms;

/// Force-split threshold for a single logical line.
pub const LINE_SPLIT_BYTES: usize = 8192;

/// Capacity of each subscriber's forward queue.
pub const SUBSCRIBER_QUEUE_LEN: usize = 256;

/// One retained logical line.
#[derive(Debug)]
struct Line {
    /// Byte offset of this line's first byte in the session's output stream.
    seq: u64,
    bytes: Vec<u8>,
    timestamp_ms: u64,
    /// Terminated by `\n` (or force-split). Only the tail line may be open.
    complete: bool,
}

impl Line {
    fn end_seq(&self) -> u64 {
        self.seq + self.bytes.len() as u64
    }
}

/// How a read addresses the retained window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Cursor-paged read from `since`.
    Full { backward: bool },
    /// First `lines` retained lines, cursor ignored.
    Head { lines: usize },
    /// Last `lines` retained lines, cursor ignored.
    Tail { lines: usize },
    /// First `head` and last `tail` lines with one omission marker between.
    HeadTail { head: usize, tail: usize },
}

/// Caps on what a single read returns. Zero means unbounded.
#[derive(Debug, Clone, Copy)]
pub struct ReadLimits {
    pub max_lines: usize,
    pub max_bytes: usize,
}

impl ReadLimits {
    fn line_cap(&self) -> usize {
        if self.max_lines == 0 {
            usize::MAX
        } else {
            self.max_lines
        }
    }

    fn byte_cap(&self) -> usize {
        if self.max_bytes == 0 {
            usize::MAX
        } else {
            self.max_bytes
        }
    }
}

/// Result of a buffer read.
#[derive(Debug)]
pub struct ReadResult {
    pub bytes: Vec<u8>,
    /// Cursor one past the last byte delivered (buffer tail for tail modes).
    pub next_cursor: u64,
    /// More sequenced data exists past `next_cursor`.
    pub has_more: bool,
    /// Lines evicted before the reader's cursor (running counter; 0 when the
    /// cursor was still inside the retained window).
    pub dropped_lines: u64,
    /// Exact bytes evicted between the reader's cursor and the oldest
    /// retained byte.
    pub dropped_bytes: u64,
}

/// Event delivered to a live subscriber, one per append.
#[derive(Debug, Clone)]
pub enum BufferEvent {
    Data { seq: u64, bytes: Arc<[u8]> },
}

/// Handle returned by [`OutputBuffer::subscribe`].
///
/// When the subscriber's queue overflows, the buffer drops the sender (the
/// receiver sees end-of-stream) and raises `overflowed` so the consumer
/// knows to recover with a cursor-based read.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    id: u64,
    pub overflowed: Arc<AtomicBool>,
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<BufferEvent>,
    overflowed: Arc<AtomicBool>,
}

/// Bounded, sequenced output log for one session.
#[derive(Debug)]
pub struct OutputBuffer {
    lines: VecDeque<Line>,
    /// Total bytes ever appended — the tail cursor.
    tail_seq: u64,
    retained_bytes: usize,
    dropped_lines: u64,
    dropped_bytes: u64,
    max_lines: usize,
    max_bytes: usize,
    notify: Arc<Notify>,
    subscribers: Vec<Subscriber>,
    next_sub_id: u64,
}

impl OutputBuffer {
    /// Create a buffer retaining at most `max_lines` lines and `max_bytes`
    /// bytes (whichever cap bites first).
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            tail_seq: 0,
            retained_bytes: 0,
            dropped_lines: 0,
            dropped_bytes: 0,
            max_lines: max_lines.max(1),
            max_bytes: max_bytes.max(LINE_SPLIT_BYTES),
            notify: Arc::new(Notify::new()),
            subscribers: Vec::new(),
            next_sub_id: 0,
        }
    }

    /// Append a chunk from the producer. Returns the new tail cursor.
    ///
    /// The assigned sequence range `[old_tail, new_tail)` is published
    /// atomically: callers hold the buffer lock, so no reader observes a
    /// partial append. Fan-out is `try_send` per subscriber — never blocks.
    pub fn append(&mut self, bytes: &[u8]) -> u64 {
        if bytes.is_empty() {
            return self.tail_seq;
        }
        let ts = now_ms();
        let start_seq = self.tail_seq;

        let mut offset = 0usize;
        while offset < bytes.len() {
            let open_len = match self.lines.back() {
                Some(l) if !l.complete => l.bytes.len(),
                _ => 0,
            };
            let room = LINE_SPLIT_BYTES - open_len;
            let window = &bytes[offset..];
            let scan = &window[..window.len().min(room)];
            let (take, completes) = match scan.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (scan.len(), scan.len() == room),
            };
            let piece = &window[..take];
            match self.lines.back_mut() {
                Some(l) if !l.complete => {
                    l.bytes.extend_from_slice(piece);
                    l.complete = completes;
                }
                _ => self.lines.push_back(Line {
                    seq: start_seq + offset as u64,
                    bytes: piece.to_vec(),
                    timestamp_ms: ts,
                    complete: completes,
                }),
            }
            self.retained_bytes += take;
            offset += take;
        }
        self.tail_seq += bytes.len() as u64;

        self.evict();
        self.fan_out(start_seq, bytes);
        self.notify.notify_waiters();
        self.tail_seq
    }

    fn evict(&mut self) {
        while self.lines.len() > self.max_lines || self.retained_bytes > self.max_bytes {
            // Only the tail line can be open; never evict it mid-write.
            let front_evictable = self
                .lines
                .front()
                .is_some_and(|l| l.complete || self.lines.len() > 1);
            if !front_evictable {
                break;
            }
            if let Some(line) = self.lines.pop_front() {
                self.retained_bytes -= line.bytes.len();
                self.dropped_lines += 1;
                self.dropped_bytes += line.bytes.len() as u64;
            }
        }
    }

    fn fan_out(&mut self, seq: u64, bytes: &[u8]) {
        if self.subscribers.is_empty() {
            return;
        }
        let chunk: Arc<[u8]> = Arc::from(bytes);
        self.subscribers.retain(|sub| {
            match sub.tx.try_send(BufferEvent::Data {
                seq,
                bytes: Arc::clone(&chunk),
            }) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: drop it rather than throttle the
                    // producer. The closed channel plus this flag is its
                    // overflow notification.
                    sub.overflowed
                        .store(true, std::sync::atomic::Ordering::SeqCst);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Cursor of the oldest retained byte (equals the tail when empty).
    pub fn oldest_seq(&self) -> u64 {
        self.lines.front().map_or(self.tail_seq, |l| l.seq)
    }

    /// Tail cursor: one past the newest byte ever appended.
    pub fn tail_seq(&self) -> u64 {
        self.tail_seq
    }

    pub fn retained_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn retained_bytes(&self) -> usize {
        self.retained_bytes
    }

    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Timestamp of the newest retained line, if any.
    pub fn newest_timestamp_ms(&self) -> Option<u64> {
        self.lines.back().map(|l| l.timestamp_ms)
    }

    /// Quick check for `wait_for_output`: any bytes past `cursor`?
    pub fn has_data_since(&self, cursor: u64) -> bool {
        self.tail_seq > cursor
    }

    /// Shared notifier, signalled once per append.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Read the retained window.
    pub fn read(&self, since: u64, mode: ReadMode, limits: ReadLimits) -> ReadResult {
        let oldest = self.oldest_seq();
        let (dropped_lines, dropped_bytes, start) = if since < oldest {
            (self.dropped_lines, oldest - since, oldest)
        } else {
            (0, 0, since.min(self.tail_seq))
        };

        match mode {
            ReadMode::Full { backward: false } => self.read_forward(start, limits, dropped_lines, dropped_bytes),
            ReadMode::Full { backward: true } => {
                let bytes = self.collect_tail_lines(limits.line_cap(), start, limits.byte_cap());
                ReadResult {
                    bytes,
                    next_cursor: self.tail_seq,
                    has_more: false,
                    dropped_lines,
                    dropped_bytes,
                }
            }
            ReadMode::Head { lines } => {
                let (bytes, end) = self.collect_head_lines(lines, limits.byte_cap());
                ReadResult {
                    bytes,
                    next_cursor: end,
                    has_more: end < self.tail_seq,
                    dropped_lines,
                    dropped_bytes,
                }
            }
            ReadMode::Tail { lines } => {
                let bytes = self.collect_tail_lines(lines, 0, limits.byte_cap());
                ReadResult {
                    bytes,
                    next_cursor: self.tail_seq,
                    has_more: false,
                    dropped_lines,
                    dropped_bytes,
                }
            }
            ReadMode::HeadTail { head, tail } => {
                let bytes = self.collect_head_tail(head, tail, limits.byte_cap());
                ReadResult {
                    bytes,
                    next_cursor: self.tail_seq,
                    has_more: false,
                    dropped_lines,
                    dropped_bytes,
                }
            }
        }
    }

    fn read_forward(
        &self,
        start: u64,
        limits: ReadLimits,
        dropped_lines: u64,
        dropped_bytes: u64,
    ) -> ReadResult {
        let line_cap = limits.line_cap();
        let byte_cap = limits.byte_cap();
        let first = self.lines.partition_point(|l| l.end_seq() <= start);

        let mut out: Vec<u8> = Vec::new();
        let mut cursor = start;
        let mut lines_taken = 0usize;
        for line in self.lines.iter().skip(first) {
            if lines_taken >= line_cap {
                break;
            }
            #[allow(clippy::cast_possible_truncation)]
            let begin = cursor.saturating_sub(line.seq) as usize;
            let slice = &line.bytes[begin..];
            let room = byte_cap - out.len();
            if room == 0 {
                break;
            }
            if slice.len() > room {
                out.extend_from_slice(&slice[..room]);
                cursor += room as u64;
                break;
            }
            out.extend_from_slice(slice);
            cursor = line.end_seq();
            lines_taken += 1;
        }

        ReadResult {
            has_more: cursor < self.tail_seq,
            bytes: out,
            next_cursor: cursor,
            dropped_lines,
            dropped_bytes,
        }
    }

    /// Concatenate the first `n` retained lines. Returns the bytes and the
    /// cursor one past the last included byte.
    fn collect_head_lines(&self, n: usize, byte_cap: usize) -> (Vec<u8>, u64) {
        let mut out = Vec::new();
        let mut end = self.oldest_seq();
        for line in self.lines.iter().take(n.max(1)) {
            if out.len() + line.bytes.len() > byte_cap {
                let room = byte_cap - out.len();
                out.extend_from_slice(&line.bytes[..room]);
                end = line.seq + room as u64;
                return (out, end);
            }
            out.extend_from_slice(&line.bytes);
            end = line.end_seq();
        }
        (out, end)
    }

    /// Concatenate the last `n` retained lines whose bytes end after
    /// `floor`. The byte cap keeps the newest end of the window.
    fn collect_tail_lines(&self, n: usize, floor: u64, byte_cap: usize) -> Vec<u8> {
        let count = n.max(1).min(self.lines.len());
        let mut out = Vec::new();
        for line in self.lines.iter().skip(self.lines.len() - count) {
            if line.end_seq() <= floor {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let begin = floor.saturating_sub(line.seq) as usize;
            out.extend_from_slice(&line.bytes[begin..]);
        }
        if out.len() > byte_cap {
            out.drain(..out.len() - byte_cap);
        }
        out
    }

    fn collect_head_tail(&self, head: usize, tail: usize, byte_cap: usize) -> Vec<u8> {
        let head = head.max(1);
        let tail = tail.max(1);
        if head + tail >= self.lines.len() {
            let (mut all, _) = self.collect_head_lines(self.lines.len().max(1), usize::MAX);
            if all.len() > byte_cap {
                all.drain(..all.len() - byte_cap);
            }
            return all;
        }
        let omitted = self.lines.len() - head - tail;
        let (mut out, _) = self.collect_head_lines(head, usize::MAX);
        if !out.ends_with(b"\n") {
            out.push(b'\n');
        }
        out.extend_from_slice(format!("[... {omitted} lines omitted ...]\n").as_bytes());
        out.extend(self.collect_tail_lines(tail, 0, usize::MAX));
        if out.len() > byte_cap {
            out.drain(..out.len() - byte_cap);
        }
        out
    }

    /// Register a live subscriber. Every future append is delivered in
    /// order; a full queue drops the subscription (see [`SubscriberHandle`]).
    pub fn subscribe(&mut self) -> (SubscriberHandle, mpsc::Receiver<BufferEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_LEN);
        let id = self.next_sub_id;
        self.next_sub_id += 1;
        let overflowed = Arc::new(AtomicBool::new(false));
        self.subscribers.push(Subscriber {
            id,
            tx,
            overflowed: Arc::clone(&overflowed),
        });
        (SubscriberHandle { id, overflowed }, rx)
    }

    /// Remove a subscriber. Idempotent.
    pub fn unsubscribe(&mut self, handle: &SubscriberHandle) {
        self.subscribers.retain(|s| s.id != handle.id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn limits() -> ReadLimits {
        ReadLimits {
            max_lines: 0,
            max_bytes: 0,
        }
    }

    fn forward() -> ReadMode {
        ReadMode::Full { backward: false }
    }

    #[test]
    fn append_returns_advancing_cursor() {
        let mut buf = OutputBuffer::new(100, 1 << 20);
        assert_eq!(buf.append(b"hello\n"), 6);
        assert_eq!(buf.append(b"world\n"), 12);
        assert_eq!(buf.tail_seq(), 12);
    }

    #[test]
    fn forward_reads_are_disjoint_and_contiguous() {
        let mut buf = OutputBuffer::new(1000, 1 << 20);
        let mut produced = Vec::new();
        for i in 0..200 {
            let line = format!("line {i:04}\n");
            produced.extend_from_slice(line.as_bytes());
            buf.append(line.as_bytes());
        }

        let mut cursor = 0;
        let mut collected = Vec::new();
        loop {
            let r = buf.read(
                cursor,
                forward(),
                ReadLimits {
                    max_lines: 37,
                    max_bytes: 0,
                },
            );
            assert!(r.next_cursor >= cursor, "cursor went backwards");
            collected.extend_from_slice(&r.bytes);
            cursor = r.next_cursor;
            if !r.has_more {
                break;
            }
        }
        assert_eq!(collected, produced);
    }

    #[test]
    fn has_more_false_only_on_final_page() {
        let mut buf = OutputBuffer::new(1000, 1 << 20);
        for i in 0..10 {
            buf.append(format!("{i}\n").as_bytes());
        }
        let r = buf.read(
            0,
            forward(),
            ReadLimits {
                max_lines: 4,
                max_bytes: 0,
            },
        );
        assert!(r.has_more);
        let r2 = buf.read(r.next_cursor, forward(), limits());
        assert!(!r2.has_more);
    }

    #[test]
    fn line_cap_evicts_from_head_and_reports_drop() {
        let mut buf = OutputBuffer::new(100, 1 << 20);
        for i in 0..1000 {
            buf.append(format!("line {i}\n").as_bytes());
        }
        assert_eq!(buf.retained_lines(), 100);
        let r = buf.read(0, forward(), limits());
        assert_eq!(r.dropped_lines, 900);
        assert!(r.dropped_bytes > 0);
        let text = String::from_utf8(r.bytes).unwrap();
        assert!(text.starts_with("line 900\n"));
        assert!(text.ends_with("line 999\n"));
    }

    #[test]
    fn byte_cap_evicts_whole_lines() {
        let mut buf = OutputBuffer::new(1_000_000, LINE_SPLIT_BYTES);
        let line = vec![b'x'; 1023];
        for _ in 0..100 {
            let mut l = line.clone();
            l.push(b'\n');
            buf.append(&l);
        }
        assert!(buf.retained_bytes() <= LINE_SPLIT_BYTES);
        // Retained suffix is whole lines from the tail
        let r = buf.read(buf.oldest_seq(), forward(), limits());
        assert_eq!(r.bytes.len() % 1024, 0);
    }

    #[test]
    fn eviction_preserves_tail_of_stream() {
        let mut buf = OutputBuffer::new(10, 1 << 20);
        let mut produced = Vec::new();
        for i in 0..50 {
            let line = format!("{i:03}\n");
            produced.extend_from_slice(line.as_bytes());
            buf.append(line.as_bytes());
        }
        let r = buf.read(0, forward(), limits());
        assert!(produced.ends_with(&r.bytes));
    }

    #[test]
    fn stale_cursor_resumes_at_oldest() {
        let mut buf = OutputBuffer::new(5, 1 << 20);
        for i in 0..20 {
            buf.append(format!("{i}\n").as_bytes());
        }
        let r = buf.read(0, forward(), limits());
        assert_eq!(r.dropped_lines, 15);
        assert_eq!(r.dropped_bytes, buf.oldest_seq());
        assert_eq!(r.next_cursor, buf.tail_seq());
    }

    #[test]
    fn mid_line_cursor_slices_within_line() {
        let mut buf = OutputBuffer::new(100, 1 << 20);
        buf.append(b"abcdef\n");
        let r = buf.read(3, forward(), limits());
        assert_eq!(r.bytes, b"def\n");
        assert_eq!(r.next_cursor, 7);
    }

    #[test]
    fn byte_limit_truncates_mid_line_and_resumes() {
        let mut buf = OutputBuffer::new(100, 1 << 20);
        buf.append(b"abcdefghij\n");
        let r = buf.read(
            0,
            forward(),
            ReadLimits {
                max_lines: 0,
                max_bytes: 4,
            },
        );
        assert_eq!(r.bytes, b"abcd");
        assert!(r.has_more);
        let r2 = buf.read(r.next_cursor, forward(), limits());
        assert_eq!(r2.bytes, b"efghij\n");
    }

    #[test]
    fn tail_mode_returns_last_lines() {
        let mut buf = OutputBuffer::new(100, 1 << 20);
        for i in 0..10 {
            buf.append(format!("l{i}\n").as_bytes());
        }
        let r = buf.read(0, ReadMode::Tail { lines: 3 }, limits());
        assert_eq!(r.bytes, b"l7\nl8\nl9\n");
        assert_eq!(r.next_cursor, buf.tail_seq());
    }

    #[test]
    fn head_mode_returns_first_lines() {
        let mut buf = OutputBuffer::new(100, 1 << 20);
        for i in 0..10 {
            buf.append(format!("l{i}\n").as_bytes());
        }
        let r = buf.read(0, ReadMode::Head { lines: 2 }, limits());
        assert_eq!(r.bytes, b"l0\nl1\n");
        assert!(r.has_more);
    }

    #[test]
    fn head_tail_mode_inserts_single_omission_marker() {
        let mut buf = OutputBuffer::new(100, 1 << 20);
        for i in 0..10 {
            buf.append(format!("l{i}\n").as_bytes());
        }
        let r = buf.read(0, ReadMode::HeadTail { head: 2, tail: 2 }, limits());
        let text = String::from_utf8(r.bytes).unwrap();
        assert_eq!(text, "l0\nl1\n[... 6 lines omitted ...]\nl8\nl9\n");
    }

    #[test]
    fn head_tail_without_elision_returns_everything() {
        let mut buf = OutputBuffer::new(100, 1 << 20);
        for i in 0..4 {
            buf.append(format!("l{i}\n").as_bytes());
        }
        let r = buf.read(0, ReadMode::HeadTail { head: 3, tail: 3 }, limits());
        let text = String::from_utf8(r.bytes).unwrap();
        assert_eq!(text, "l0\nl1\nl2\nl3\n");
        assert!(!text.contains("omitted"));
    }

    #[test]
    fn partial_line_appends_accumulate_into_one_line() {
        let mut buf = OutputBuffer::new(100, 1 << 20);
        buf.append(b"par");
        buf.append(b"tial");
        buf.append(b" line\n");
        assert_eq!(buf.retained_lines(), 1);
        let r = buf.read(0, forward(), limits());
        assert_eq!(r.bytes, b"partial line\n");
    }

    #[test]
    fn pathological_line_is_force_split() {
        let mut buf = OutputBuffer::new(1000, 1 << 20);
        let blob = vec![b'z'; LINE_SPLIT_BYTES * 3 + 17];
        buf.append(&blob);
        assert_eq!(buf.retained_lines(), 4);
        let r = buf.read(0, forward(), limits());
        assert_eq!(r.bytes, blob);
    }

    #[test]
    fn open_tail_line_is_never_evicted() {
        let mut buf = OutputBuffer::new(1, 1 << 20);
        buf.append(b"no newline yet");
        buf.append(b", still going");
        assert_eq!(buf.retained_lines(), 1);
        let r = buf.read(0, forward(), limits());
        assert_eq!(r.bytes, b"no newline yet, still going");
    }

    #[test]
    fn subscriber_receives_appends_in_order() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut buf = OutputBuffer::new(100, 1 << 20);
            let (_handle, mut rx) = buf.subscribe();
            buf.append(b"one\n");
            buf.append(b"two\n");
            let BufferEvent::Data { seq, bytes } = rx.recv().await.unwrap();
            assert_eq!(seq, 0);
            assert_eq!(&bytes[..], b"one\n");
            let BufferEvent::Data { seq, bytes } = rx.recv().await.unwrap();
            assert_eq!(seq, 4);
            assert_eq!(&bytes[..], b"two\n");
        });
    }

    #[test]
    fn slow_subscriber_is_dropped_with_overflow_flag() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut buf = OutputBuffer::new(100_000, 100 << 20);
            let (handle, mut rx) = buf.subscribe();
            // Never drain: overflow after the queue fills
            for i in 0..(SUBSCRIBER_QUEUE_LEN + 10) {
                buf.append(format!("{i}\n").as_bytes());
            }
            assert_eq!(buf.subscriber_count(), 0);
            assert!(handle.overflowed.load(Ordering::SeqCst));
            // Drain what was queued before the drop; stream then ends
            let mut received = 0;
            while rx.recv().await.is_some() {
                received += 1;
            }
            assert_eq!(received, SUBSCRIBER_QUEUE_LEN);
        });
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut buf = OutputBuffer::new(100, 1 << 20);
        let (handle, _rx) = buf.subscribe();
        assert_eq!(buf.subscriber_count(), 1);
        buf.unsubscribe(&handle);
        buf.unsubscribe(&handle);
        assert_eq!(buf.subscriber_count(), 0);
    }

    #[test]
    fn sequence_space_survives_eviction() {
        let mut buf = OutputBuffer::new(2, 1 << 20);
        buf.append(b"aaa\n");
        buf.append(b"bbb\n");
        buf.append(b"ccc\n");
        // First line evicted; its sequence range [0,4) is gone for good
        assert_eq!(buf.oldest_seq(), 4);
        assert_eq!(buf.tail_seq(), 12);
        let r = buf.read(4, forward(), limits());
        assert_eq!(r.bytes, b"bbb\nccc\n");
        assert_eq!(r.dropped_lines, 0);
    }
}
