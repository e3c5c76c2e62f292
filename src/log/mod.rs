//! Structured relay log: one JSON object per line.
//!
//! Each bridge run appends to `<state_dir>/relay.jsonl`: detected blocks,
//! duplicates, backend outcomes, fallbacks, and deliveries. Every line carries
//! an RFC 3339 timestamp so the file can be grepped, streamed, and
//! post-processed alongside the request archive.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, warn};

/// A structured event in the relay log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: RelayEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum RelayEvent {
    /// The relay began reading the worker log.
    RelayStarted {
        worker: String,
        backend: String,
        mode: String,
    },
    /// A request block was extracted from worker output.
    BlockDetected {
        kind: String,
        fingerprint: String,
        lines: usize,
    },
    /// A block whose fingerprint was already seen.
    DuplicateSkipped { fingerprint: String },
    /// Request written to inbox and archive.
    RequestPersisted { id: String },
    /// What the controller backend produced.
    BackendFinished {
        id: String,
        backend: String,
        outcome: String,
    },
    /// The retry guidance replaced an empty or failed reply.
    FallbackUsed { id: String, reason: String },
    /// Reply had no usable worker section and was sent whole.
    MissingWorkerSection { id: String },
    /// Reply typed into the worker pane.
    ReplyDelivered {
        id: String,
        endpoint: String,
        lines: usize,
    },
    /// Delivery to the worker failed.
    DeliveryFailed { id: String, error: String },
    /// Reply computed but not delivered (dry run).
    DryRun { id: String },
    /// The relay stopped.
    RelayStopped { reason: String },
}

/// Writer for JSON lines relay logs.
pub struct RelayLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl RelayLog {
    /// Open (append) the log at `path`, creating parent directories.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Log an event.
    pub fn log(&self, event: RelayEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "relay log");

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("relay log writer poisoned"))?;
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    /// Log an event, downgrading write failures to a warning.
    pub fn record(&self, event: RelayEvent) {
        if let Err(e) = self.log(event) {
            warn!(log = %self.path.display(), error = %e, "failed to write relay log");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_to_json() {
        let entry = LogEntry {
            timestamp: "2026-01-02T03:04:05.000Z".to_string(),
            event: RelayEvent::BlockDetected {
                kind: "explicit".to_string(),
                fingerprint: "0123456789".to_string(),
                lines: 3,
            },
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"event\":\"block_detected\""));
        assert!(json.contains("\"fingerprint\":\"0123456789\""));
        assert!(json.contains("\"timestamp\":\"2026-01-02T03:04:05.000Z\""));
    }

    #[test]
    fn write_and_read_log_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("relay.jsonl");

        let log = RelayLog::new(&log_path).unwrap();
        log.log(RelayEvent::RelayStarted {
            worker: "%1".to_string(),
            backend: "none".to_string(),
            mode: "auto".to_string(),
        })
        .unwrap();
        log.log(RelayEvent::DuplicateSkipped {
            fingerprint: "abc".to_string(),
        })
        .unwrap();
        log.record(RelayEvent::RelayStopped {
            reason: "interrupted".to_string(),
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        for line in &lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("event").is_some());
            let stamp = parsed["timestamp"].as_str().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
        }

        assert!(lines[0].contains("\"event\":\"relay_started\""));
        assert!(lines[1].contains("\"event\":\"duplicate_skipped\""));
        assert!(lines[2].contains("\"event\":\"relay_stopped\""));
    }

    #[test]
    fn creates_parent_directories_and_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("deep").join("nested").join("relay.jsonl");

        {
            let log = RelayLog::new(&log_path).unwrap();
            log.log(RelayEvent::DryRun { id: "a".to_string() }).unwrap();
        }
        {
            let log = RelayLog::new(&log_path).unwrap();
            assert_eq!(log.path(), log_path);
            log.log(RelayEvent::DryRun { id: "b".to_string() }).unwrap();
        }

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
