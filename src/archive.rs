//! Flat-file request/response store.
//!
//! ```text
//! <state_dir>/inbox/<id>.request.txt     request staging
//! <state_dir>/outbox/<id>.response.txt   reply staging
//! <state_dir>/archive/<id>.request.txt   append-only archive
//! <state_dir>/archive/<id>.response.txt
//! ```
//!
//! The archive is never rewritten or pruned here; it is the only input for
//! rebuilding the seen-set after a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::dedup::SeenSet;

const REQUEST_SUFFIX: &str = ".request.txt";
const RESPONSE_SUFFIX: &str = ".response.txt";

/// Interval between checks for an operator-written reply.
pub const MANUAL_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct Store {
    inbox: PathBuf,
    outbox: PathBuf,
    archive: PathBuf,
}

impl Store {
    /// Open the store under `state_dir`, creating its directories.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let store = Self {
            inbox: state_dir.join("inbox"),
            outbox: state_dir.join("outbox"),
            archive: state_dir.join("archive"),
        };
        for dir in [&store.inbox, &store.outbox, &store.archive] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create state directory: {}", dir.display()))?;
        }
        Ok(store)
    }

    pub fn inbox_path(&self, id: &str) -> PathBuf {
        self.inbox.join(format!("{id}{REQUEST_SUFFIX}"))
    }

    pub fn outbox_path(&self, id: &str) -> PathBuf {
        self.outbox.join(format!("{id}{RESPONSE_SUFFIX}"))
    }

    pub fn archived_request_path(&self, id: &str) -> PathBuf {
        self.archive.join(format!("{id}{REQUEST_SUFFIX}"))
    }

    pub fn archived_response_path(&self, id: &str) -> PathBuf {
        self.archive.join(format!("{id}{RESPONSE_SUFFIX}"))
    }

    /// Stage and archive a request before anything is dispatched.
    pub fn persist_request(&self, id: &str, content: &str) -> Result<()> {
        write_file(&self.inbox_path(id), content)?;
        write_file(&self.archived_request_path(id), content)?;
        debug!(id, "request persisted");
        Ok(())
    }

    /// Stage a relay-produced reply in the outbox.
    pub fn stage_response(&self, id: &str, content: &str) -> Result<()> {
        write_file(&self.outbox_path(id), content)
    }

    pub fn archive_response(&self, id: &str, content: &str) -> Result<()> {
        write_file(&self.archived_response_path(id), content)
    }

    /// Read every archived request text (unreadable files are skipped).
    pub fn archived_requests(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.archive) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to list archive: {}", self.archive.display())
                });
            }
        };

        let mut texts = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(REQUEST_SUFFIX) {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(text) => texts.push(text),
                Err(e) => warn!(file = %name, error = %e, "skipping unreadable archived request"),
            }
        }
        Ok(texts)
    }

    /// Seen-set rebuilt from the archive.
    pub fn rehydrate_seen(&self) -> Result<SeenSet> {
        Ok(SeenSet::from_texts(self.archived_requests()?))
    }

    /// Wait for an operator to drop a reply into the outbox.
    ///
    /// Returns `None` when `timeout` elapses first; a zero timeout never
    /// elapses.
    pub fn wait_for_outbox(
        &self,
        id: &str,
        clock: &dyn Clock,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let path = self.outbox_path(id);
        let started = clock.now();
        loop {
            match std::fs::read_to_string(&path) {
                Ok(text) => return Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to read reply: {}", path.display()));
                }
            }
            if !timeout.is_zero() && clock.now().saturating_sub(started) >= timeout {
                return Ok(None);
            }
            clock.sleep(MANUAL_POLL_INTERVAL);
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}
