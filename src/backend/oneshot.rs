//! One controller process per request.
//!
//! Runs `codex exec` with a composed prompt and a read-only sandbox, then
//! takes the first delimited reply block out of whatever the process printed.
//! The process is killed if it outlives the timeout.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{BackendOutcome, ControllerRequest};
use crate::clock::Clock;
use crate::patterns;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const REPLY_FORMAT: &str = "Respond with a controller response wrapped in these delimiters:\n\
<<CONTROLLER_RESPONSE>>\n\
WORKER INSTRUCTIONS:\n\
...instructions...\n\
NOTES:\n\
...notes...\n\
<<CONTROLLER_RESPONSE_END>>";

#[derive(Debug, Clone)]
pub struct OneShotBackend {
    pub program: String,
    pub model: Option<String>,
    pub extra_args: Vec<String>,
    /// File whose contents lead the prompt.
    pub system_prompt: Option<PathBuf>,
    pub timeout: Duration,
}

impl OneShotBackend {
    /// Argument vector after the program name.
    pub fn command_args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--skip-git-repo-check".to_string(),
            prompt.to_string(),
            "--sandbox".to_string(),
            "read-only".to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub(super) fn produce(&self, request: &ControllerRequest, clock: &dyn Clock) -> BackendOutcome {
        let system_prompt = self.load_system_prompt();
        let prompt = compose_prompt(system_prompt.as_deref(), &request.body);
        debug!(request_id = %request.id, prompt_len = prompt.len(), "one-shot controller prompt");

        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args(&prompt));

        match run_with_timeout(cmd, self.timeout, clock) {
            Ok(Some(output)) => {
                if !output.success {
                    warn!(request_id = %request.id, stderr = %output.stderr.trim(), "controller exited with error");
                }
                let text = if output.stdout.trim().is_empty() {
                    output.stderr.trim()
                } else {
                    output.stdout.trim()
                };
                BackendOutcome::Reply(extract_response_from_text(text))
            }
            Ok(None) => BackendOutcome::TimedOut,
            Err(e) => BackendOutcome::Failed(format!("{e:#}")),
        }
    }

    /// Missing or unreadable prompt files are treated as empty.
    fn load_system_prompt(&self) -> Option<String> {
        let path = self.system_prompt.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read controller system prompt");
                None
            }
        }
    }
}

/// Prompt for a one-shot controller call.
pub fn compose_prompt(system_prompt: Option<&str>, body: &str) -> String {
    let mut parts = Vec::new();
    if let Some(sys) = system_prompt.filter(|s| !s.trim().is_empty()) {
        parts.push(sys.trim());
    }
    parts.push("Controller request:");
    parts.push(body.trim());
    parts.push(REPLY_FORMAT);
    parts.join("\n\n")
}

/// Body of the first delimited reply block, or the whole text trimmed if
/// there is none.
pub fn extract_response_from_text(text: &str) -> String {
    let mut in_block = false;
    let mut collected = Vec::new();
    for line in text.lines() {
        if !in_block {
            in_block = patterns::is_response_start(line) && !patterns::is_response_end(line);
            continue;
        }
        if patterns::is_response_end(line) {
            break;
        }
        collected.push(line);
    }
    if collected.is_empty() {
        text.trim().to_string()
    } else {
        collected.join("\n").trim().to_string()
    }
}

struct ProcessOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Run `cmd` to completion, or kill it after `timeout`.
///
/// Returns `None` on timeout. A zero timeout waits for the child forever.
fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    clock: &dyn Clock,
) -> Result<Option<ProcessOutput>> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run controller command: {:?}", cmd.get_program()))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let started = clock.now();
    let status = loop {
        if let Some(status) = child.try_wait().context("failed to wait for controller")? {
            break status;
        }
        if !timeout.is_zero() && clock.now().saturating_sub(started) >= timeout {
            warn!(timeout_secs = timeout.as_secs(), "controller command timed out, killing it");
            if let Err(e) = child.kill() {
                warn!(error = %e, "failed to kill controller command");
            }
            let _ = child.wait();
            return Ok(None);
        }
        clock.sleep(EXIT_POLL_INTERVAL);
    };

    Ok(Some(ProcessOutput {
        success: status.success(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    }))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
