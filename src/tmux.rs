//! tmux plumbing for the bridge.
//!
//! Wraps the tmux CLI for pane discovery, output capture via `pipe-pane`, and
//! input injection. Short lines are typed with `send-keys -l`; long lines go
//! through a named paste buffer so tmux input limits and per-key interleaving
//! do not apply.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::endpoint::Endpoint;

/// Lines longer than this (in bytes) are pasted instead of typed.
pub const PASTE_THRESHOLD: usize = 1000;

/// Metadata for a tmux pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneDetails {
    pub id: String,
    pub window_name: String,
    pub title: String,
    pub command: String,
    pub pid: String,
}

impl PaneDetails {
    /// Case-insensitive match of `label` against window name, title, or command.
    pub fn matches_label(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        [&self.window_name, &self.title, &self.command]
            .iter()
            .any(|field| field.to_lowercase().contains(&label))
    }

    fn runs(&self, program: &str) -> bool {
        self.command.to_lowercase().contains(program)
    }
}

fn run_tmux<I, S>(args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    Command::new("tmux")
        .args(args)
        .output()
        .context("failed to run tmux command")
}

/// Check that tmux is installed and reachable.
pub fn check_tmux() -> Result<String> {
    let output = Command::new("tmux").arg("-V").output().context(
        "tmux not found; install tmux (e.g., `apt install tmux` or `brew install tmux`)",
    )?;

    if !output.status.success() {
        bail!(
            "tmux -V failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(version = %version, "tmux found");
    Ok(version)
}

/// Name of the session the bridge itself runs in, if any.
pub fn current_session() -> Option<String> {
    let output = run_tmux(["display-message", "-p", "#S"]).ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!name.is_empty()).then_some(name)
}

/// Check if a tmux session exists.
pub fn session_exists(session: &str) -> bool {
    run_tmux(["has-session", "-t", session])
        .map(|o| o.status.success())
        .unwrap_or(false)
}

const PANE_FORMAT: &str =
    "#{pane_id}\t#{window_name}\t#{pane_title}\t#{pane_current_command}\t#{pane_pid}";

/// List panes in `session`, or across all sessions when `None`.
pub fn list_pane_details(session: Option<&str>) -> Result<Vec<PaneDetails>> {
    let output = match session {
        Some(session) => run_tmux(["list-panes", "-s", "-t", session, "-F", PANE_FORMAT])?,
        None => run_tmux(["list-panes", "-a", "-F", PANE_FORMAT])?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux list-panes failed: {stderr}");
    }

    Ok(parse_pane_details(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_pane_details(raw: &str) -> Vec<PaneDetails> {
    let mut panes = Vec::new();
    for line in raw.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        let [id, window_name, title, command, pid] = parts.as_slice() else {
            continue;
        };
        panes.push(PaneDetails {
            id: id.to_string(),
            window_name: window_name.to_string(),
            title: title.to_string(),
            command: command.to_string(),
            pid: pid.to_string(),
        });
    }
    panes
}

/// Full command line of a process, via `ps`. Empty when unavailable.
pub fn process_command(pid: &str) -> String {
    Command::new("ps")
        .args(["-o", "command=", "-p", pid])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default()
}

/// Pick a pane by label, then by a pane running `program`, then by process
/// command line. Panes listed in `exclude` are skipped.
pub fn select_pane(
    panes: &[PaneDetails],
    label: &str,
    program: &str,
    exclude: Option<&str>,
    process_command: impl Fn(&str) -> String,
) -> Option<String> {
    let candidates: Vec<&PaneDetails> = panes
        .iter()
        .filter(|pane| Some(pane.id.as_str()) != exclude)
        .collect();

    candidates
        .iter()
        .find(|pane| pane.matches_label(label))
        .or_else(|| candidates.iter().find(|pane| pane.runs(program)))
        .or_else(|| {
            candidates
                .iter()
                .find(|pane| process_command(&pane.pid).to_lowercase().contains(program))
        })
        .map(|pane| pane.id.clone())
}

/// Set up pipe-pane only if none is configured yet (`tmux pipe-pane -o`).
pub fn setup_pipe_pane_if_missing(target: &str, log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
    }

    let pipe_cmd = format!("cat >> '{}'", log_path.display().to_string().replace('\'', r"'\''"));
    let output = run_tmux(["pipe-pane", "-o", "-t", target, &pipe_cmd])
        .with_context(|| format!("failed to set up pipe-pane (-o) for target '{target}'"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux pipe-pane -o failed: {stderr}");
    }

    info!(
        target = target,
        log = %log_path.display(),
        "pipe-pane ensured (only-if-missing)"
    );
    Ok(())
}

/// Send keys to a tmux target.
///
/// The `keys` string is sent literally, followed by Enter if `press_enter`.
pub fn send_keys(target: &str, keys: &str, press_enter: bool) -> Result<()> {
    if !keys.is_empty() {
        // `-l` keeps punctuation from being read as tmux key names.
        let output = run_tmux(["send-keys", "-t", target, "-l", "--", keys])
            .with_context(|| format!("failed to send keys to target '{target}'"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux send-keys failed: {stderr}");
        }
    }

    if press_enter {
        let output = run_tmux(["send-keys", "-t", target, "Enter"])
            .with_context(|| format!("failed to send Enter to target '{target}'"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux send-keys Enter failed: {stderr}");
        }
    }

    debug!(target = target, len = keys.len(), "sent keys");
    Ok(())
}

/// Paste `text` through a process-private buffer, then press Enter.
pub fn paste_text(target: &str, text: &str) -> Result<()> {
    let buffer = format!("macs-bridge-{}", std::process::id());

    let mut child = Command::new("tmux")
        .args(["load-buffer", "-b", &buffer, "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to run tmux load-buffer")?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .context("failed to write paste buffer")?;
    }
    let output = child
        .wait_with_output()
        .context("failed to wait for tmux load-buffer")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux load-buffer failed: {stderr}");
    }

    let output = run_tmux(["paste-buffer", "-t", target, "-b", &buffer])
        .with_context(|| format!("failed to paste into target '{target}'"))?;
    // Best-effort cleanup; paste-buffer already consumed the content.
    let _ = run_tmux(["delete-buffer", "-b", &buffer]);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux paste-buffer failed: {stderr}");
    }

    send_keys(target, "", true)
}

/// Deliver one line: typed when short, pasted when long.
pub fn send_line(target: &str, line: &str) -> Result<()> {
    if line.len() <= PASTE_THRESHOLD {
        send_keys(target, line, true)
    } else {
        paste_text(target, line)
    }
}

/// A tmux pane as a relay endpoint.
#[derive(Debug, Clone)]
pub struct TmuxPane {
    pane_id: String,
}

impl TmuxPane {
    pub fn new(pane_id: impl Into<String>) -> Self {
        Self {
            pane_id: pane_id.into(),
        }
    }
}

impl Endpoint for TmuxPane {
    fn id(&self) -> &str {
        &self.pane_id
    }

    fn deliver_line(&self, line: &str) -> Result<()> {
        send_line(&self.pane_id, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pane(id: &str, window: &str, title: &str, command: &str) -> PaneDetails {
        PaneDetails {
            id: id.to_string(),
            window_name: window.to_string(),
            title: title.to_string(),
            command: command.to_string(),
            pid: format!("{}", 1000 + id.trim_start_matches('%').parse::<u32>().unwrap()),
        }
    }

    fn no_processes(_pid: &str) -> String {
        String::new()
    }

    #[test]
    fn parse_pane_details_skips_malformed_rows() {
        let raw = "%0\tmain\thost\tzsh\t100\n%1\tbroken\n%2\tWorker\tcodex\tnode\t102\n";
        let panes = parse_pane_details(raw);
        assert_eq!(panes.len(), 2);
        assert_eq!(panes[1].id, "%2");
        assert_eq!(panes[1].window_name, "Worker");
        assert_eq!(panes[1].pid, "102");
    }

    #[test]
    fn label_match_wins_over_program() {
        let panes = vec![
            pane("%0", "shell", "", "codex"),
            pane("%1", "my-worker", "", "zsh"),
        ];
        assert_eq!(
            select_pane(&panes, "worker", "codex", None, no_processes).as_deref(),
            Some("%1")
        );
    }

    #[test]
    fn label_match_is_case_insensitive_on_title() {
        let panes = vec![pane("%4", "main", "CONTROLLER", "zsh")];
        assert_eq!(
            select_pane(&panes, "controller", "codex", None, no_processes).as_deref(),
            Some("%4")
        );
    }

    #[test]
    fn falls_back_to_running_program() {
        let panes = vec![pane("%0", "a", "", "zsh"), pane("%1", "b", "", "codex")];
        assert_eq!(
            select_pane(&panes, "worker", "codex", None, no_processes).as_deref(),
            Some("%1")
        );
    }

    #[test]
    fn falls_back_to_process_command_line() {
        let panes = vec![pane("%0", "a", "", "node"), pane("%1", "b", "", "node")];
        let ps = |pid: &str| {
            if pid == "1001" {
                "node /usr/lib/codex/bin/codex.js".to_string()
            } else {
                "node server.js".to_string()
            }
        };
        assert_eq!(
            select_pane(&panes, "worker", "codex", None, ps).as_deref(),
            Some("%1")
        );
    }

    #[test]
    fn excluded_pane_is_never_chosen() {
        let panes = vec![pane("%0", "controller-ish", "", "codex"), pane("%1", "b", "", "codex")];
        assert_eq!(
            select_pane(&panes, "controller", "codex", Some("%0"), no_processes).as_deref(),
            Some("%1")
        );
        assert!(select_pane(&panes[..1], "controller", "codex", Some("%0"), no_processes).is_none());
    }

    #[test]
    fn tmux_pane_reports_its_id() {
        let pane = TmuxPane::new("%7");
        assert_eq!(pane.id(), "%7");
    }

    #[cfg(feature = "integration")]
    mod integration {
        use super::super::*;

        fn start(session: &str) {
            let _ = run_tmux(["kill-session", "-t", session]);
            let output = run_tmux(["new-session", "-d", "-s", session, "cat"]).unwrap();
            assert!(output.status.success());
        }

        fn stop(session: &str) {
            let _ = run_tmux(["kill-session", "-t", session]);
        }

        #[test]
        fn send_line_reaches_piped_log() {
            let session = "macs-bridge-test-send";
            start(session);
            let tmp = tempfile::tempdir().unwrap();
            let log = tmp.path().join("pane.log");
            let pane = list_pane_details(Some(session)).unwrap()[0].id.clone();
            setup_pipe_pane_if_missing(&pane, &log).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(200));

            send_line(&pane, "bridge ping").unwrap();
            send_line(&pane, &"x".repeat(PASTE_THRESHOLD + 10)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(400));

            let content = std::fs::read_to_string(&log).unwrap_or_default();
            stop(session);
            assert!(content.contains("bridge ping"), "log was: {content:?}");
            assert!(content.contains(&"x".repeat(PASTE_THRESHOLD)));
        }

        #[test]
        fn session_exists_tracks_lifecycle() {
            let session = "macs-bridge-test-exists";
            start(session);
            assert!(session_exists(session));
            stop(session);
            assert!(!session_exists(session));
        }
    }
}
