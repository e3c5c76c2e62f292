//! Line tailing for pipe-pane log files.
//!
//! tmux `pipe-pane` appends raw pane output to a file. [`LogTailer`] remembers
//! a byte offset into that file and, on each poll, reads whatever was appended
//! since, splitting it into complete lines. Bytes after the last newline are
//! held back until the line is finished, so a line is never split or lost.

use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::patterns;

/// Interval between polls when the live tail is idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Incremental reader over a growing log file.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    position: u64,
    pending: Vec<u8>,
}

impl LogTailer {
    /// Tail from the current end of the file (live relay).
    ///
    /// A file that does not exist yet is tailed from its start once it
    /// appears.
    pub fn live(path: &Path) -> Result<Self> {
        let position = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to stat log file: {}", path.display()));
            }
        };
        debug!(log = %path.display(), position, "tailing from end");
        Ok(Self::new_with_position(path, position))
    }

    /// Read the file from its beginning (bulk replay of a finished log).
    pub fn replay(path: &Path) -> Self {
        Self::new_with_position(path, 0)
    }

    /// Start from a specific byte offset. An offset beyond EOF is taken as a
    /// truncated file, which is then read from its start.
    pub fn new_with_position(path: &Path, position: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            position,
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether an unterminated line is buffered.
    pub fn has_partial_line(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Read newly appended content and return the complete lines in it.
    ///
    /// Line terminators (`\n` or `\r\n`) are not included.
    pub fn poll(&mut self) -> Result<Vec<String>> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to open log file: {}", self.path.display()));
            }
        };

        // Truncated or rotated underneath us.
        let file_len = file.metadata().map(|m| m.len()).unwrap_or(0);
        if self.position > file_len {
            debug!(
                log = %self.path.display(),
                position = self.position,
                file_len,
                "log shrank, rereading from start"
            );
            self.position = 0;
            self.pending.clear();
        }

        file.seek(SeekFrom::Start(self.position))
            .context("failed to seek in log file")?;

        let mut new_bytes = Vec::new();
        let n = file
            .read_to_end(&mut new_bytes)
            .context("failed to read log file")?;
        if n == 0 {
            return Ok(Vec::new());
        }
        self.position += n as u64;
        self.pending.extend_from_slice(&new_bytes);

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        trace!(log = %self.path.display(), lines = lines.len(), "polled");
        Ok(lines)
    }

    /// Take the buffered unterminated line, if any.
    pub fn take_partial_line(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Line iterator over a [`LogTailer`].
///
/// In follow mode an idle tail sleeps `interval` on the clock and polls again,
/// forever (or until the stop flag is raised). In replay mode the iterator
/// ends when the file is exhausted, yielding any unterminated last line first.
pub struct Lines<'a> {
    tailer: LogTailer,
    clock: &'a dyn Clock,
    interval: Duration,
    follow: bool,
    stop: Option<Arc<AtomicBool>>,
    queue: VecDeque<String>,
    finished: bool,
}

impl<'a> Lines<'a> {
    pub fn follow(tailer: LogTailer, clock: &'a dyn Clock, interval: Duration) -> Self {
        Self::new(tailer, clock, interval, true)
    }

    pub fn replay(tailer: LogTailer, clock: &'a dyn Clock) -> Self {
        Self::new(tailer, clock, Duration::ZERO, false)
    }

    fn new(tailer: LogTailer, clock: &'a dyn Clock, interval: Duration, follow: bool) -> Self {
        Self {
            tailer,
            clock,
            interval,
            follow,
            stop: None,
            queue: VecDeque::new(),
            finished: false,
        }
    }

    /// End a follow iteration once `stop` is set (checked between polls).
    pub fn until(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stopped(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl Iterator for Lines<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.queue.pop_front() {
                return Some(Ok(line));
            }
            if self.finished || self.stopped() {
                return None;
            }
            match self.tailer.poll() {
                Ok(lines) if !lines.is_empty() => self.queue.extend(lines),
                Ok(_) if self.follow => self.clock.sleep(self.interval),
                Ok(_) => {
                    self.finished = true;
                    if let Some(last) = self.tailer.take_partial_line() {
                        return Some(Ok(last));
                    }
                }
                Err(e) => {
                    if self.follow {
                        self.clock.sleep(self.interval);
                    } else {
                        self.finished = true;
                    }
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Recent worker output for controller context.
///
/// Takes the last `max_lines` lines of the log and removes explicit request
/// blocks from them, since the request itself is sent separately.
pub fn recent_context(path: &Path, max_lines: usize) -> String {
    if max_lines == 0 {
        return String::new();
    }
    let Ok(bytes) = std::fs::read(path) else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let tail = &lines[lines.len().saturating_sub(max_lines)..];

    let mut cleaned = Vec::new();
    let mut in_block = false;
    for line in tail {
        if patterns::is_request_start(line) && !in_block {
            in_block = !patterns::is_request_end(line);
            continue;
        }
        if in_block {
            if patterns::is_request_end(line) {
                in_block = false;
            }
            continue;
        }
        cleaned.push(line.trim_end_matches('\r'));
    }
    cleaned.join("\n").trim().to_string()
}
