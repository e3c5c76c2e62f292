//! Resolve the panes a live relay needs before it starts.
//!
//! These are the only fatal errors of a run: if the session, the worker pane,
//! or (for the interactive backend) the controller pane cannot be found, the
//! binary reports it and exits with status 1.

use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;

use crate::tmux::{self, PaneDetails};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(
        "tmux session not found: {0}. Start controller/worker sessions first or pass --worker-pane/--controller-pane."
    )]
    SessionNotFound(String),
    #[error("unable to find worker pane. Provide --worker-pane.")]
    WorkerPaneNotFound,
    #[error("unable to find controller pane. Provide --controller-pane.")]
    ControllerPaneNotFound,
    #[error(transparent)]
    Tmux(#[from] anyhow::Error),
}

/// Where pane metadata comes from.
pub trait PaneSource {
    fn session_exists(&self, session: &str) -> bool;
    fn panes(&self, session: Option<&str>) -> Result<Vec<PaneDetails>>;
    fn process_command(&self, pid: &str) -> String;
}

/// The tmux server the bridge runs under.
pub struct TmuxPanes;

impl PaneSource for TmuxPanes {
    fn session_exists(&self, session: &str) -> bool {
        tmux::session_exists(session)
    }

    fn panes(&self, session: Option<&str>) -> Result<Vec<PaneDetails>> {
        tmux::list_pane_details(session)
    }

    fn process_command(&self, pid: &str) -> String {
        tmux::process_command(pid)
    }
}

/// What the operator asked for; unset panes are discovered.
#[derive(Debug, Clone, Default)]
pub struct PaneRequest {
    pub session: Option<String>,
    pub worker_pane: Option<String>,
    pub controller_pane: Option<String>,
    /// Agent program used to recognize panes (`codex`).
    pub program: String,
    pub needs_controller: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneTargets {
    pub session: Option<String>,
    pub worker: String,
    pub controller: Option<String>,
}

pub fn resolve_panes(
    request: &PaneRequest,
    source: &dyn PaneSource,
) -> Result<PaneTargets, StartupError> {
    let session = request.session.as_deref();
    if request.worker_pane.is_none() {
        if let Some(name) = session {
            if !source.session_exists(name) {
                return Err(StartupError::SessionNotFound(name.to_string()));
            }
        }
    }

    let must_discover = request.worker_pane.is_none()
        || (request.needs_controller && request.controller_pane.is_none());
    let panes = if must_discover {
        source.panes(session)?
    } else {
        Vec::new()
    };

    let worker = match &request.worker_pane {
        Some(pane) => pane.clone(),
        None => tmux::select_pane(&panes, "worker", &request.program, None, |pid| {
            source.process_command(pid)
        })
        .ok_or(StartupError::WorkerPaneNotFound)?,
    };

    let controller = if request.needs_controller {
        let pane = match &request.controller_pane {
            Some(pane) => pane.clone(),
            None => tmux::select_pane(
                &panes,
                "controller",
                &request.program,
                Some(&worker),
                |pid| source.process_command(pid),
            )
            .ok_or(StartupError::ControllerPaneNotFound)?,
        };
        Some(pane)
    } else {
        None
    };

    info!(
        session = session.unwrap_or("all-sessions"),
        worker = %worker,
        controller = controller.as_deref().unwrap_or("-"),
        "panes resolved"
    );
    Ok(PaneTargets {
        session: request.session.clone(),
        worker,
        controller,
    })
}

/// Pipe `pane` into `log`, creating the log file if absent.
pub fn attach_log(pane: &str, log: &Path) -> Result<()> {
    tmux::setup_pipe_pane_if_missing(pane, log)?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .with_context(|| format!("failed to create log file: {}", log.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakePanes {
        sessions: Vec<&'static str>,
        panes: Vec<PaneDetails>,
        listings: Cell<usize>,
    }

    impl FakePanes {
        fn new(panes: Vec<PaneDetails>) -> Self {
            Self {
                sessions: vec!["macs"],
                panes,
                listings: Cell::new(0),
            }
        }
    }

    impl PaneSource for FakePanes {
        fn session_exists(&self, session: &str) -> bool {
            self.sessions.contains(&session)
        }

        fn panes(&self, _session: Option<&str>) -> Result<Vec<PaneDetails>> {
            self.listings.set(self.listings.get() + 1);
            Ok(self.panes.clone())
        }

        fn process_command(&self, _pid: &str) -> String {
            String::new()
        }
    }

    fn pane(id: &str, window: &str, command: &str) -> PaneDetails {
        PaneDetails {
            id: id.to_string(),
            window_name: window.to_string(),
            title: String::new(),
            command: command.to_string(),
            pid: "1".to_string(),
        }
    }

    fn request(session: Option<&str>, needs_controller: bool) -> PaneRequest {
        PaneRequest {
            session: session.map(str::to_string),
            program: "codex".to_string(),
            needs_controller,
            ..PaneRequest::default()
        }
    }

    #[test]
    fn discovers_worker_and_controller() {
        let source = FakePanes::new(vec![
            pane("%1", "controller", "codex"),
            pane("%2", "worker", "codex"),
        ]);
        let targets = resolve_panes(&request(Some("macs"), true), &source).unwrap();
        assert_eq!(targets.worker, "%2");
        assert_eq!(targets.controller.as_deref(), Some("%1"));
        assert_eq!(source.listings.get(), 1);
    }

    #[test]
    fn controller_is_never_the_worker() {
        let source = FakePanes::new(vec![pane("%1", "main", "codex")]);
        let err = resolve_panes(&request(None, true), &source).unwrap_err();
        assert!(matches!(err, StartupError::ControllerPaneNotFound));
    }

    #[test]
    fn missing_session_is_fatal() {
        let source = FakePanes::new(vec![pane("%1", "worker", "zsh")]);
        let err = resolve_panes(&request(Some("nope"), false), &source).unwrap_err();
        assert!(matches!(err, StartupError::SessionNotFound(ref s) if s == "nope"));
        assert!(err.to_string().contains("--worker-pane"));
    }

    #[test]
    fn explicit_worker_skips_session_check_and_listing() {
        let source = FakePanes::new(Vec::new());
        let mut req = request(Some("nope"), false);
        req.worker_pane = Some("%7".to_string());
        let targets = resolve_panes(&req, &source).unwrap();
        assert_eq!(targets.worker, "%7");
        assert!(targets.controller.is_none());
        assert_eq!(source.listings.get(), 0);
    }

    #[test]
    fn no_worker_pane_is_fatal() {
        let source = FakePanes::new(vec![pane("%1", "editor", "vim")]);
        let err = resolve_panes(&request(None, false), &source).unwrap_err();
        assert!(matches!(err, StartupError::WorkerPaneNotFound));
    }

    #[test]
    fn explicit_controller_pane_is_used() {
        let source = FakePanes::new(vec![pane("%2", "worker", "codex")]);
        let mut req = request(None, true);
        req.controller_pane = Some("%9".to_string());
        let targets = resolve_panes(&req, &source).unwrap();
        assert_eq!(targets.controller.as_deref(), Some("%9"));
    }
}
