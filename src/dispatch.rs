//! Per-block pipeline: dedup, persist, ask the controller, deliver.
//!
//! One [`Dispatcher`] owns the seen-set for a relay run. Blocks are handled
//! strictly one at a time; the relay does not read further worker output
//! until `handle_block` returns.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::archive::Store;
use crate::backend::{Backend, ControllerRequest};
use crate::clock::Clock;
use crate::dedup::{self, SeenSet};
use crate::endpoint::{self, Endpoint};
use crate::extract::{Block, BlockKind};
use crate::log::{RelayEvent, RelayLog};
use crate::split::split_reply;
use crate::tail;

/// Sent to the worker when the controller produced nothing usable.
pub const RETRY_GUIDANCE: &str = "WORKER INSTRUCTIONS:\n\
Controller backend did not return a response (timeout or error).\n\
Please resend the last request and include any critical context or logs.\n\
\n\
NOTES:\n\
Controller backend returned an empty response. Check controller session/logs and retry.\n";

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Persist requests only; no controller, no delivery.
    pub simulate: bool,
    /// Compute and print replies without typing them.
    pub dry_run: bool,
    /// Deliver only the worker section of replies.
    pub split_response: bool,
    pub worker_context_lines: usize,
    /// Worker log used for context; `None` disables context.
    pub worker_log: Option<PathBuf>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            simulate: false,
            dry_run: false,
            split_response: true,
            worker_context_lines: 40,
            worker_log: None,
        }
    }
}

/// An accepted request, persisted before any backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub id: String,
    pub fingerprint: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl RequestRecord {
    pub fn new(content: &str, fingerprint: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: dedup::request_id(created_at, &fingerprint),
            fingerprint,
            content: content.to_string(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub id: String,
    /// Reply as archived.
    pub content: String,
    /// What the worker receives.
    pub worker_text: String,
    pub notes_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Fingerprint already seen; nothing was done.
    Duplicate { fingerprint: String },
    /// Request persisted in simulate mode.
    Captured { request: RequestRecord },
    /// Reply computed but not delivered.
    DryRun { response: ResponseRecord },
    Delivered { response: ResponseRecord, lines: usize },
}

pub struct Dispatcher<'a> {
    backend: Backend,
    store: Store,
    seen: SeenSet,
    worker: Option<Box<dyn Endpoint>>,
    options: DispatchOptions,
    log: Option<RelayLog>,
    clock: &'a dyn Clock,
}

impl<'a> Dispatcher<'a> {
    /// Create a dispatcher whose seen-set is rebuilt from the archive.
    pub fn new(
        backend: Backend,
        store: Store,
        options: DispatchOptions,
        clock: &'a dyn Clock,
    ) -> Result<Self> {
        let seen = store.rehydrate_seen()?;
        info!(known = seen.len(), "seen-set rebuilt from archive");
        Ok(Self {
            backend,
            store,
            seen,
            worker: None,
            options,
            log: None,
            clock,
        })
    }

    pub fn with_worker(mut self, worker: Box<dyn Endpoint>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_log(mut self, log: RelayLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn record(&self, event: RelayEvent) {
        if let Some(log) = &self.log {
            log.record(event);
        }
    }

    pub fn handle_block(&mut self, block: &Block) -> Result<DispatchOutcome> {
        let fingerprint = dedup::fingerprint(&block.text);
        self.record(RelayEvent::BlockDetected {
            kind: kind_label(block.kind).to_string(),
            fingerprint: fingerprint.clone(),
            lines: block.line_count(),
        });

        if !self.seen.insert(&fingerprint) {
            debug!(fingerprint = %fingerprint, "duplicate block skipped");
            self.record(RelayEvent::DuplicateSkipped {
                fingerprint: fingerprint.clone(),
            });
            return Ok(DispatchOutcome::Duplicate { fingerprint });
        }

        let request = RequestRecord::new(&block.text, fingerprint, Utc::now());
        let id = request.id.clone();
        self.store.persist_request(&id, &request.content)?;
        info!(request_id = %id, kind = kind_label(block.kind), "request captured");
        self.record(RelayEvent::RequestPersisted { id: id.clone() });

        if self.options.simulate {
            println!("[simulate] wrote {}", self.store.inbox_path(&id).display());
            return Ok(DispatchOutcome::Captured { request });
        }

        let controller_request = ControllerRequest {
            id: id.clone(),
            body: self.request_body(&request.content),
        };
        let outcome = self.backend.produce(&controller_request, self.clock);
        self.record(RelayEvent::BackendFinished {
            id: id.clone(),
            backend: self.backend.name().to_string(),
            outcome: outcome.label().to_string(),
        });

        let reply = match outcome.usable_reply() {
            Some(text) => text.to_string(),
            None => {
                warn!(request_id = %id, outcome = outcome.label(), "controller gave no reply, sending retry guidance");
                self.record(RelayEvent::FallbackUsed {
                    id: id.clone(),
                    reason: outcome.label().to_string(),
                });
                RETRY_GUIDANCE.to_string()
            }
        };

        if self.backend.stages_reply() {
            self.store.stage_response(&id, &reply)?;
        }
        self.store.archive_response(&id, &reply)?;

        let response = self.response_record(&id, reply);

        if self.options.dry_run {
            println!("[dry-run] would send response:");
            println!("{}", response.worker_text);
            self.record(RelayEvent::DryRun { id });
            return Ok(DispatchOutcome::DryRun { response });
        }

        let Some(worker) = self.worker.as_deref() else {
            bail!("no worker endpoint configured for delivery");
        };
        println!(
            "[bridge] sending to worker pane {} ({} lines)",
            worker.id(),
            response.worker_text.lines().count()
        );
        match endpoint::deliver_text(worker, &response.worker_text) {
            Ok(lines) => {
                self.record(RelayEvent::ReplyDelivered {
                    id: id.clone(),
                    endpoint: worker.id().to_string(),
                    lines,
                });
                Ok(DispatchOutcome::Delivered { response, lines })
            }
            Err(e) => {
                self.record(RelayEvent::DeliveryFailed {
                    id: id.clone(),
                    error: format!("{e:#}"),
                });
                Err(e).with_context(|| format!("failed to deliver reply {id}"))
            }
        }
    }

    /// Block text plus recent worker output, when the backend wants it.
    fn request_body(&self, block_text: &str) -> String {
        if !self.backend.wants_worker_context() {
            return block_text.to_string();
        }
        let Some(worker_log) = &self.options.worker_log else {
            return block_text.to_string();
        };
        let context = tail::recent_context(worker_log, self.options.worker_context_lines);
        if context.is_empty() {
            block_text.to_string()
        } else {
            format!("{}\n\n[WORKER_CONTEXT]\n{}\n", block_text.trim(), context)
        }
    }

    /// Decide what the worker receives; surfaces notes to the operator.
    fn response_record(&self, id: &str, reply: String) -> ResponseRecord {
        if !self.options.split_response {
            return ResponseRecord {
                id: id.to_string(),
                worker_text: reply.clone(),
                content: reply,
                notes_text: String::new(),
            };
        }
        let split = split_reply(&reply);
        if !split.has_worker_section {
            warn!(request_id = %id, "could not find WORKER INSTRUCTIONS section; sending full response");
            self.record(RelayEvent::MissingWorkerSection { id: id.to_string() });
        }
        if !split.notes.is_empty() {
            println!("[notes]");
            println!("{}", split.notes);
        }
        ResponseRecord {
            id: id.to_string(),
            content: reply,
            worker_text: split.worker,
            notes_text: split.notes,
        }
    }
}

fn kind_label(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::Explicit => "explicit",
        BlockKind::Heuristic(_) => "heuristic",
    }
}
