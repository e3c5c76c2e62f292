//! Match controller replies to the request that is waiting for them.
//!
//! The controller pane's log is scanned from where it stood when the request
//! was sent. A reply is either a delimited block
//! (`<<CONTROLLER_RESPONSE id=...>>` .. `<<CONTROLLER_RESPONSE_END>>`) or a
//! bare `WORKER INSTRUCTIONS:` / `NOTES:` reply with no delimiters. Delimited
//! replies carrying another request's id are collected to their end line and
//! discarded. A reply that has reached its notes section and then goes quiet
//! is accepted without an end delimiter.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::patterns::{self, Section};
use crate::tail::{DEFAULT_POLL_INTERVAL, LogTailer};

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Hard bound on the whole wait. Zero waits forever.
    pub timeout: Duration,
    /// Silence after the notes section that finalizes an undelimited reply.
    pub quiet_period: Duration,
    pub poll_interval: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            quiet_period: Duration::from_secs(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Collecting {
        /// Correlation id on the start delimiter, if any.
        id: Option<String>,
        /// Started by a delimiter rather than a bare header.
        delimited: bool,
        lines: Vec<String>,
        seen_notes: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplyLine {
    Start(Option<String>),
    End,
    Header(Section),
    Plain,
}

impl ReplyLine {
    fn of(line: &str) -> Self {
        // The start pattern also matches the end delimiter.
        if patterns::is_response_end(line) {
            ReplyLine::End
        } else if patterns::is_response_start(line) {
            ReplyLine::Start(patterns::correlation_id(line))
        } else if let Some((section, _)) = patterns::parse_section_header(line) {
            ReplyLine::Header(section)
        } else {
            ReplyLine::Plain
        }
    }
}

/// Line-driven reply matcher for one outstanding request.
pub struct ReplyScanner {
    request_id: String,
    state: ScanState,
}

impl ReplyScanner {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Feed one controller log line; returns the reply when it completes.
    pub fn feed(&mut self, line: &str) -> Option<String> {
        let class = ReplyLine::of(line);
        let state = std::mem::replace(&mut self.state, ScanState::Idle);
        let (next, reply) = match (state, class) {
            (_, ReplyLine::Start(id)) => (collecting(id, true, Vec::new(), false), None),
            (ScanState::Idle, ReplyLine::Header(Section::WorkerInstructions)) => {
                (collecting(None, false, vec![line.to_string()], false), None)
            }
            (ScanState::Idle, _) => (ScanState::Idle, None),
            (ScanState::Collecting { id, lines, .. }, ReplyLine::End) => {
                if self.is_stale(id.as_deref()) {
                    debug!(
                        reply_id = id.as_deref().unwrap_or_default(),
                        request_id = %self.request_id,
                        "discarding reply for another request"
                    );
                    (ScanState::Idle, None)
                } else {
                    (ScanState::Idle, Some(join(&lines)))
                }
            }
            (
                ScanState::Collecting {
                    id,
                    delimited,
                    mut lines,
                    seen_notes,
                },
                class,
            ) => {
                lines.push(line.to_string());
                let seen_notes = seen_notes || class == ReplyLine::Header(Section::Notes);
                (collecting(id, delimited, lines, seen_notes), None)
            }
        };
        self.state = next;
        reply
    }

    /// The reply so far, if it may be finalized by silence.
    ///
    /// Only a non-stale reply that has reached its notes section qualifies.
    pub fn settled_reply(&self) -> Option<String> {
        match &self.state {
            ScanState::Collecting {
                id,
                lines,
                seen_notes: true,
                ..
            } if !self.is_stale(id.as_deref()) => Some(join(lines)),
            _ => None,
        }
    }

    fn is_stale(&self, reply_id: Option<&str>) -> bool {
        reply_id.is_some_and(|id| id != self.request_id)
    }
}

fn collecting(id: Option<String>, delimited: bool, lines: Vec<String>, seen_notes: bool) -> ScanState {
    ScanState::Collecting {
        id,
        delimited,
        lines,
        seen_notes,
    }
}

fn join(lines: &[String]) -> String {
    lines.join("\n").trim().to_string()
}

/// Wait for the reply to `request_id` on an already positioned tailer.
///
/// Returns `None` on timeout.
pub fn wait_for_reply(
    tailer: &mut LogTailer,
    request_id: &str,
    config: &CorrelatorConfig,
    clock: &dyn Clock,
) -> Result<Option<String>> {
    let mut scanner = ReplyScanner::new(request_id);
    let started = clock.now();
    let mut last_activity = started;

    loop {
        if !config.timeout.is_zero() && clock.now().saturating_sub(started) > config.timeout {
            info!(request_id, timeout_secs = config.timeout.as_secs(), "controller reply timed out");
            return Ok(None);
        }

        let lines = tailer.poll()?;
        if lines.is_empty() {
            if let Some(reply) = scanner.settled_reply() {
                if clock.now().saturating_sub(last_activity) >= config.quiet_period {
                    debug!(request_id, "reply finalized after quiet period");
                    return Ok(Some(reply));
                }
            }
            clock.sleep(config.poll_interval);
            continue;
        }

        last_activity = clock.now();
        for line in lines {
            if let Some(reply) = scanner.feed(&line) {
                debug!(request_id, "reply delimiter closed");
                return Ok(Some(reply));
            }
        }
    }
}
