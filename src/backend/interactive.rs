//! Long-running controller session in another tmux pane.
//!
//! The request is typed into the controller pane under the shared send lock,
//! wrapped in delimiters that carry the request id. The reply is read back
//! from the controller pane's log by the correlator.

use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use super::{BackendOutcome, ControllerRequest};
use crate::clock::Clock;
use crate::correlate::{self, CorrelatorConfig};
use crate::endpoint::Endpoint;
use crate::lock::SendLock;
use crate::patterns;
use crate::tail::LogTailer;

pub struct InteractiveBackend {
    pub controller: Box<dyn Endpoint>,
    /// Line typed before each request, e.g. `/prompts:controller`.
    pub command: Option<String>,
    /// pipe-pane log of the controller pane.
    pub log: PathBuf,
    pub lock_path: PathBuf,
    pub correlator: CorrelatorConfig,
}

impl InteractiveBackend {
    pub(super) fn produce(&self, request: &ControllerRequest, clock: &dyn Clock) -> BackendOutcome {
        match self.exchange(request, clock) {
            Ok(Some(reply)) => BackendOutcome::Reply(reply),
            Ok(None) => BackendOutcome::TimedOut,
            Err(e) => BackendOutcome::Failed(format!("{e:#}")),
        }
    }

    fn exchange(&self, request: &ControllerRequest, clock: &dyn Clock) -> Result<Option<String>> {
        // Positioned before sending so a fast reply is not skipped.
        let mut tailer = LogTailer::live(&self.log)?;

        {
            let _lock = SendLock::acquire(&self.lock_path)?;
            let lines = request_lines(self.command.as_deref(), &request.id, &request.body);
            debug!(
                request_id = %request.id,
                controller = self.controller.id(),
                lines = lines.len(),
                "sending request to controller"
            );
            for line in &lines {
                self.controller.deliver_line(line)?;
            }
        }

        correlate::wait_for_reply(&mut tailer, &request.id, &self.correlator, clock)
    }
}

/// Lines typed into the controller pane for one request.
pub fn request_lines(command: Option<&str>, id: &str, body: &str) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(command) = command.filter(|c| !c.trim().is_empty()) {
        lines.push(command.to_string());
    }
    lines.push(patterns::request_start(id));
    lines.extend(body.trim().split('\n').map(str::to_string));
    lines.push(patterns::REQUEST_END.to_string());
    lines
}
