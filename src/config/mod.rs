use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".macs";

/// How replies are produced.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// A configured controller backend answers.
    #[default]
    Auto,
    /// An operator writes each reply into the outbox.
    Manual,
}

/// Which controller backend answers in automatic mode.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Placeholder reply, no controller involved.
    None,
    /// One `codex exec` call per request.
    Codex,
    /// A long-running controller session in another tmux pane.
    #[default]
    CodexInteractive,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::None => "none",
            BackendKind::Codex => "codex",
            BackendKind::CodexInteractive => "codex-interactive",
        }
    }
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Manual => "manual",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_heuristic_lines() -> usize {
    crate::extract::DEFAULT_HEURISTIC_LINES
}

fn default_worker_context_lines() -> usize {
    40
}

fn default_worker_log() -> PathBuf {
    PathBuf::from("/tmp/macs-worker.log")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("bridge")
}

fn default_poll_interval_millis() -> u64 {
    200
}

fn default_manual_timeout_secs() -> u64 {
    3600
}

fn default_controller_program() -> String {
    "codex".to_string()
}

fn default_controller_command() -> Option<String> {
    Some("/prompts:controller".to_string())
}

fn default_controller_log() -> PathBuf {
    PathBuf::from("/tmp/macs-controller.log")
}

fn default_controller_timeout_secs() -> u64 {
    300
}

fn default_quiet_period_millis() -> u64 {
    1000
}

fn default_lock_path() -> PathBuf {
    PathBuf::from(crate::lock::DEFAULT_LOCK_PATH)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelaySettings {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_true")]
    pub heuristic: bool,
    #[serde(default = "default_heuristic_lines")]
    pub heuristic_lines: usize,
    #[serde(default = "default_true")]
    pub split_response: bool,
    #[serde(default = "default_worker_context_lines")]
    pub worker_context_lines: usize,
    #[serde(default = "default_worker_log")]
    pub worker_log: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    /// 0 waits for the operator indefinitely.
    #[serde(default = "default_manual_timeout_secs")]
    pub manual_timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            heuristic: true,
            heuristic_lines: default_heuristic_lines(),
            split_response: true,
            worker_context_lines: default_worker_context_lines(),
            worker_log: default_worker_log(),
            state_dir: default_state_dir(),
            poll_interval_millis: default_poll_interval_millis(),
            manual_timeout_secs: default_manual_timeout_secs(),
        }
    }
}

impl RelaySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn manual_timeout(&self) -> Duration {
        Duration::from_secs(self.manual_timeout_secs)
    }
}

/// Controller backend settings.
///
/// ```toml
/// [controller]
/// backend = "codex"
/// model = "o4-mini"
/// extra_args = ["--config", "reasoning=high"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerSettings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_controller_program")]
    pub program: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<PathBuf>,
    /// Line typed into the controller pane before each request.
    #[serde(default = "default_controller_command")]
    pub command: Option<String>,
    #[serde(default = "default_controller_log")]
    pub log: PathBuf,
    /// 0 disables the limit.
    #[serde(default = "default_controller_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_quiet_period_millis")]
    pub quiet_period_millis: u64,
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            program: default_controller_program(),
            model: None,
            extra_args: Vec::new(),
            system_prompt: None,
            command: default_controller_command(),
            log: default_controller_log(),
            timeout_secs: default_controller_timeout_secs(),
            quiet_period_millis: default_quiet_period_millis(),
            lock_path: default_lock_path(),
        }
    }
}

impl ControllerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_millis)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub controller: ControllerSettings,
}

impl BridgeConfig {
    /// Search upward from `start` for a `.macs/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: BridgeConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((BridgeConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Where the JSONL audit log lives.
    pub fn audit_log_path(&self) -> PathBuf {
        self.relay.state_dir.join("relay.jsonl")
    }
}
