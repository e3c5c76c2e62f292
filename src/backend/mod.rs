//! Controller backends: where a reply to a request comes from.
//!
//! Every backend takes the same [`ControllerRequest`] and yields a
//! [`BackendOutcome`]. Errors never escape a backend; they become
//! [`BackendOutcome::Failed`] so the dispatcher can substitute retry guidance.

pub mod interactive;
pub mod oneshot;

use std::time::Duration;

use tracing::info;

use crate::archive::Store;
use crate::clock::Clock;

pub use interactive::InteractiveBackend;
pub use oneshot::OneShotBackend;

/// A request as handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRequest {
    /// Correlation id (`<timestamp>_<fingerprint>`).
    pub id: String,
    /// Block text, possibly followed by a `[WORKER_CONTEXT]` section.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOutcome {
    Reply(String),
    TimedOut,
    Failed(String),
}

impl BackendOutcome {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            BackendOutcome::Reply(text) if text.trim().is_empty() => "empty",
            BackendOutcome::Reply(_) => "reply",
            BackendOutcome::TimedOut => "timed_out",
            BackendOutcome::Failed(_) => "failed",
        }
    }

    /// The reply text, when there is a non-blank one.
    pub fn usable_reply(&self) -> Option<&str> {
        match self {
            BackendOutcome::Reply(text) if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }
}

/// Operator answers by writing `outbox/<id>.response.txt`.
#[derive(Debug, Clone)]
pub struct ManualBackend {
    pub store: Store,
    pub timeout: Duration,
}

impl ManualBackend {
    fn produce(&self, request: &ControllerRequest, clock: &dyn Clock) -> BackendOutcome {
        println!(
            "Controller request captured: {}",
            self.store.inbox_path(&request.id).display()
        );
        println!(
            "Write response to: {}",
            self.store.outbox_path(&request.id).display()
        );
        match self.store.wait_for_outbox(&request.id, clock, self.timeout) {
            Ok(Some(text)) => BackendOutcome::Reply(text),
            Ok(None) => BackendOutcome::TimedOut,
            Err(e) => BackendOutcome::Failed(format!("{e:#}")),
        }
    }
}

pub enum Backend {
    /// Placeholder reply without any controller.
    Offline,
    OneShot(OneShotBackend),
    Interactive(InteractiveBackend),
    Manual(ManualBackend),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Offline => "none",
            Backend::OneShot(_) => "codex",
            Backend::Interactive(_) => "codex-interactive",
            Backend::Manual(_) => "manual",
        }
    }

    /// Whether the request body should carry recent worker output.
    pub fn wants_worker_context(&self) -> bool {
        !matches!(self, Backend::Manual(_))
    }

    /// Whether the dispatcher should write the reply into the outbox.
    /// A manual reply is already there.
    pub fn stages_reply(&self) -> bool {
        !matches!(self, Backend::Manual(_))
    }

    pub fn produce(&self, request: &ControllerRequest, clock: &dyn Clock) -> BackendOutcome {
        info!(request_id = %request.id, backend = self.name(), "requesting controller reply");
        match self {
            Backend::Offline => BackendOutcome::Reply(placeholder_reply(&request.body)),
            Backend::OneShot(backend) => backend.produce(request, clock),
            Backend::Interactive(backend) => backend.produce(request, clock),
            Backend::Manual(backend) => backend.produce(request, clock),
        }
    }
}

/// Reply used when no controller backend is configured.
pub fn placeholder_reply(body: &str) -> String {
    format!(
        "WORKER INSTRUCTIONS:\n\
         AUTO MODE PLACEHOLDER\n\
         - Continue with the safest approach.\n\
         - Maintain all security invariants.\n\
         - Report back when complete or blocked.\n\
         \n\
         Requested block:\n\
         {}\n\
         \n\
         NOTES:\n\
         Auto response generated (no controller backend configured).\n",
        body.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::split::split_reply;

    fn request(id: &str, body: &str) -> ControllerRequest {
        ControllerRequest {
            id: id.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn placeholder_embeds_block_and_splits_cleanly() {
        let reply = placeholder_reply("  <<CONTROLLER_REQUEST>>\nhelp\n<<CONTROLLER_REQUEST_END>>\n");
        assert!(reply.starts_with("WORKER INSTRUCTIONS:\nAUTO MODE PLACEHOLDER\n"));
        assert!(reply.contains("Requested block:\n<<CONTROLLER_REQUEST>>\nhelp\n"));

        let split = split_reply(&reply);
        assert!(split.has_worker_section);
        assert!(split.worker.contains("Continue with the safest approach."));
        assert_eq!(
            split.notes,
            "Auto response generated (no controller backend configured)."
        );
    }

    #[test]
    fn offline_backend_always_replies() {
        let clock = ManualClock::new();
        let outcome = Backend::Offline.produce(&request("r", "block"), &clock);
        assert_eq!(outcome.label(), "reply");
        assert!(outcome.usable_reply().unwrap().contains("block"));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(BackendOutcome::Reply("  \n".into()).label(), "empty");
        assert!(BackendOutcome::Reply("  \n".into()).usable_reply().is_none());
        assert_eq!(BackendOutcome::TimedOut.label(), "timed_out");
        assert_eq!(BackendOutcome::Failed("x".into()).label(), "failed");
    }

    #[test]
    fn manual_backend_reads_outbox() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        let outbox = store.outbox_path("r1");
        let clock = ManualClock::with_sleep_hook(move |now| {
            if now >= Duration::from_secs(2) && !outbox.exists() {
                std::fs::write(&outbox, "WORKER INSTRUCTIONS:\nby hand\n").unwrap();
            }
        });
        let backend = Backend::Manual(ManualBackend {
            store,
            timeout: Duration::from_secs(60),
        });

        assert!(!backend.wants_worker_context());
        assert!(!backend.stages_reply());
        let outcome = backend.produce(&request("r1", "b"), &clock);
        assert_eq!(
            outcome,
            BackendOutcome::Reply("WORKER INSTRUCTIONS:\nby hand\n".to_string())
        );
    }

    #[test]
    fn manual_backend_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Backend::Manual(ManualBackend {
            store: Store::open(tmp.path()).unwrap(),
            timeout: Duration::from_secs(5),
        });
        let clock = ManualClock::new();
        assert_eq!(
            backend.produce(&request("r2", "b"), &clock),
            BackendOutcome::TimedOut
        );
    }

    #[test]
    fn manual_backend_without_timeout_waits_for_operator() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        let outbox = store.outbox_path("r3");
        let clock = ManualClock::with_sleep_hook(move |now| {
            if now >= Duration::from_secs(4 * 3600) && !outbox.exists() {
                std::fs::write(&outbox, "WORKER INSTRUCTIONS:\novernight\n").unwrap();
            }
        });
        let backend = Backend::Manual(ManualBackend {
            store,
            timeout: Duration::ZERO,
        });

        assert_eq!(
            backend.produce(&request("r3", "b"), &clock),
            BackendOutcome::Reply("WORKER INSTRUCTIONS:\novernight\n".to_string())
        );
    }
}
