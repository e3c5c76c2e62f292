use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{BackendKind, BridgeConfig, Mode};

#[derive(Parser, Debug)]
#[command(
    name = "macs-bridge",
    about = "Relay controller requests between a worker tmux pane and a controller agent",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Relay live worker output to the controller and replies back
    Run(RunArgs),

    /// Parse a finished worker log and persist its requests without replying
    Simulate {
        /// Worker log to replay
        log: PathBuf,

        #[command(flatten)]
        scan: ScanArgs,

        /// State directory (inbox, outbox, archive)
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Show effective configuration
    Config {
        /// Emit machine-readable JSON output
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

/// Block detection flags shared by `run` and `simulate`.
#[derive(Args, Debug, Default, Clone)]
pub struct ScanArgs {
    /// Disable heuristic triggers for questions/completion
    #[arg(long)]
    pub no_heuristic: bool,

    /// Recent lines included in a heuristic request block
    #[arg(long)]
    pub heuristic_lines: Option<usize>,
}

impl ScanArgs {
    pub fn apply(&self, config: &mut BridgeConfig) {
        if self.no_heuristic {
            config.relay.heuristic = false;
        }
        if let Some(lines) = self.heuristic_lines {
            config.relay.heuristic_lines = lines;
        }
    }
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// tmux session name (defaults to the current session)
    #[arg(long)]
    pub session: Option<String>,

    /// Worker pane id (e.g. %3); discovered when omitted
    #[arg(long)]
    pub worker_pane: Option<String>,

    /// Controller pane id for the interactive backend
    #[arg(long)]
    pub controller_pane: Option<String>,

    /// Worker log path
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Controller pane log path
    #[arg(long)]
    pub controller_log: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Controller backend for automatic replies
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Model name for the one-shot backend
    #[arg(long)]
    pub model: Option<String>,

    /// Extra argument passed to the one-shot controller (repeatable)
    #[arg(long = "extra-arg", allow_hyphen_values = true)]
    pub extra_args: Vec<String>,

    /// System prompt file for the one-shot backend
    #[arg(long)]
    pub system_prompt: Option<PathBuf>,

    /// Line typed into the controller pane before each request
    #[arg(long)]
    pub controller_command: Option<String>,

    /// Seconds to wait for a controller reply
    #[arg(long)]
    pub controller_timeout: Option<u64>,

    /// Recent worker log lines sent as controller context (0 disables)
    #[arg(long)]
    pub worker_context_lines: Option<usize>,

    /// Send the whole reply, including NOTES, to the worker
    #[arg(long)]
    pub no_split_response: bool,

    /// State directory (inbox, outbox, archive)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Print replies instead of sending them to the worker
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub scan: ScanArgs,
}

impl RunArgs {
    /// Overlay command-line flags on the loaded configuration.
    pub fn apply(&self, config: &mut BridgeConfig) {
        let relay = &mut config.relay;
        if let Some(log) = &self.log {
            relay.worker_log = log.clone();
        }
        if let Some(mode) = self.mode {
            relay.mode = mode;
        }
        if let Some(lines) = self.worker_context_lines {
            relay.worker_context_lines = lines;
        }
        if self.no_split_response {
            relay.split_response = false;
        }
        if let Some(dir) = &self.state_dir {
            relay.state_dir = dir.clone();
        }

        let controller = &mut config.controller;
        if let Some(backend) = self.backend {
            controller.backend = backend;
        }
        if let Some(log) = &self.controller_log {
            controller.log = log.clone();
        }
        if let Some(model) = &self.model {
            controller.model = Some(model.clone());
        }
        if !self.extra_args.is_empty() {
            controller.extra_args = self.extra_args.clone();
        }
        if let Some(path) = &self.system_prompt {
            controller.system_prompt = Some(path.clone());
        }
        if let Some(command) = &self.controller_command {
            controller.command = Some(command.clone()).filter(|c| !c.trim().is_empty());
        }
        if let Some(secs) = self.controller_timeout {
            controller.timeout_secs = secs;
        }

        self.scan.apply(config);
    }
}

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "(defaults, no .macs/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<22} {value}\n"));
}

fn opt_label<T: std::fmt::Display>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(none)".to_string())
}

pub fn render_config_human(config: &BridgeConfig, config_path: Option<&Path>) -> String {
    let relay = &config.relay;
    let mut output = String::new();
    output.push_str("Relay\n");
    push_kv(&mut output, "mode", relay.mode.label());
    push_kv(&mut output, "heuristic", relay.heuristic);
    push_kv(&mut output, "heuristic_lines", relay.heuristic_lines);
    push_kv(&mut output, "split_response", relay.split_response);
    push_kv(&mut output, "worker_context_lines", relay.worker_context_lines);
    push_kv(&mut output, "worker_log", relay.worker_log.display());
    push_kv(&mut output, "state_dir", relay.state_dir.display());
    push_kv(&mut output, "poll_interval", format!("{}ms", relay.poll_interval_millis));
    push_kv(&mut output, "manual_timeout", format!("{}s", relay.manual_timeout_secs));
    output.push('\n');

    let controller = &config.controller;
    output.push_str("Controller\n");
    push_kv(&mut output, "backend", controller.backend.label());
    push_kv(&mut output, "program", &controller.program);
    push_kv(&mut output, "model", opt_label(controller.model.as_deref()));
    if controller.extra_args.is_empty() {
        push_kv(&mut output, "extra_args", "(none)");
    } else {
        push_kv(&mut output, "extra_args", controller.extra_args.join(", "));
    }
    push_kv(
        &mut output,
        "system_prompt",
        opt_label(controller.system_prompt.as_ref().map(|p| p.display())),
    );
    push_kv(&mut output, "command", opt_label(controller.command.as_deref()));
    push_kv(&mut output, "log", controller.log.display());
    push_kv(&mut output, "timeout", format!("{}s", controller.timeout_secs));
    push_kv(
        &mut output,
        "quiet_period",
        format!("{}ms", controller.quiet_period_millis),
    );
    push_kv(&mut output, "lock_path", controller.lock_path.display());
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

pub fn render_config_json(config: &BridgeConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to serialize config")?;
    payload["source_path"] = serde_json::Value::String(config_source_label(config_path));
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}
