//! Assemble a relay from configuration and run it.
//!
//! `live` wires tmux panes, pipe-pane logs, the configured backend and the
//! audit log together and follows the worker log until Ctrl-C. `simulate`
//! replays a finished log and only persists the requests it finds.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::archive::Store;
use crate::backend::{Backend, InteractiveBackend, ManualBackend, OneShotBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendKind, BridgeConfig, Mode};
use crate::correlate::CorrelatorConfig;
use crate::dispatch::{DispatchOptions, Dispatcher};
use crate::extract::{BlockExtractor, ExtractorConfig};
use crate::log::{RelayEvent, RelayLog};
use crate::relay::{self, RelayStats};
use crate::startup::{self, PaneTargets};
use crate::tail::{Lines, LogTailer};
use crate::tmux::TmuxPane;

/// Pick the backend for this run.
///
/// `controller_pane` is required for the interactive backend.
pub fn build_backend(
    config: &BridgeConfig,
    store: &Store,
    controller_pane: Option<&str>,
) -> Result<Backend> {
    if config.relay.mode == Mode::Manual {
        return Ok(Backend::Manual(ManualBackend {
            store: store.clone(),
            timeout: config.relay.manual_timeout(),
        }));
    }

    let controller = &config.controller;
    Ok(match controller.backend {
        BackendKind::None => Backend::Offline,
        BackendKind::Codex => Backend::OneShot(OneShotBackend {
            program: controller.program.clone(),
            model: controller.model.clone(),
            extra_args: controller.extra_args.clone(),
            system_prompt: controller.system_prompt.clone(),
            timeout: controller.timeout(),
        }),
        BackendKind::CodexInteractive => {
            let pane = controller_pane
                .context("interactive backend needs a controller pane")?;
            Backend::Interactive(InteractiveBackend {
                controller: Box::new(TmuxPane::new(pane)),
                command: controller.command.clone(),
                log: controller.log.clone(),
                lock_path: controller.lock_path.clone(),
                correlator: CorrelatorConfig {
                    timeout: controller.timeout(),
                    quiet_period: controller.quiet_period(),
                    poll_interval: config.relay.poll_interval(),
                },
            })
        }
    })
}

/// Whether the configured run talks to a controller pane.
pub fn needs_controller_pane(config: &BridgeConfig) -> bool {
    config.relay.mode == Mode::Auto && config.controller.backend == BackendKind::CodexInteractive
}

fn extractor(config: &BridgeConfig) -> BlockExtractor {
    BlockExtractor::new(ExtractorConfig {
        heuristic: config.relay.heuristic,
        window: config.relay.heuristic_lines,
    })
}

fn stop_on_ctrlc() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();
    // A second Ctrl-C aborts a blocking controller wait.
    ctrlc::set_handler(move || {
        if stop_clone.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
    })
    .ok();
    stop
}

/// Follow the worker pane until interrupted.
pub fn live(config: &BridgeConfig, targets: &PaneTargets, dry_run: bool) -> Result<RelayStats> {
    let worker_log = &config.relay.worker_log;
    startup::attach_log(&targets.worker, worker_log)?;
    if let Some(pane) = &targets.controller {
        startup::attach_log(pane, &config.controller.log)?;
    }

    println!(
        "\x1b[36m[bridge]\x1b[0m session={} pane={} log={}",
        targets.session.as_deref().unwrap_or("all-sessions"),
        targets.worker,
        worker_log.display()
    );
    println!(
        "\x1b[36m[bridge]\x1b[0m mode={} heuristic={} lines={} controller_backend={}",
        config.relay.mode.label(),
        if config.relay.heuristic { "on" } else { "off" },
        config.relay.heuristic_lines,
        config.controller.backend.label()
    );
    if let Some(pane) = &targets.controller {
        println!(
            "\x1b[36m[bridge]\x1b[0m controller_pane={} controller_log={}",
            pane,
            config.controller.log.display()
        );
    }

    let store = Store::open(&config.relay.state_dir)?;
    let backend = build_backend(config, &store, targets.controller.as_deref())?;
    let options = DispatchOptions {
        simulate: false,
        dry_run,
        split_response: config.relay.split_response,
        worker_context_lines: config.relay.worker_context_lines,
        worker_log: Some(worker_log.clone()),
    };

    let clock = SystemClock::new();
    let log = RelayLog::new(&config.audit_log_path())?;
    let mut dispatcher = Dispatcher::new(backend, store, options, &clock)?
        .with_worker(Box::new(TmuxPane::new(targets.worker.clone())))
        .with_log(log);
    dispatcher.record(RelayEvent::RelayStarted {
        worker: targets.worker.clone(),
        backend: dispatcher.backend().name().to_string(),
        mode: config.relay.mode.label().to_string(),
    });

    let stop = stop_on_ctrlc();
    let tailer = LogTailer::live(worker_log)?;
    info!(log = %worker_log.display(), "following worker log");
    let lines = Lines::follow(tailer, &clock, config.relay.poll_interval()).until(stop);
    let stats = relay::relay_lines(lines, &mut extractor(config), &mut dispatcher);

    dispatcher.record(RelayEvent::RelayStopped {
        reason: "interrupted".to_string(),
    });
    Ok(stats)
}

/// Replay a finished log, persisting requests without dispatching them.
pub fn simulate(config: &BridgeConfig, log_path: &Path) -> Result<RelayStats> {
    simulate_with_clock(config, log_path, &SystemClock::new())
}

fn simulate_with_clock(
    config: &BridgeConfig,
    log_path: &Path,
    clock: &dyn Clock,
) -> Result<RelayStats> {
    if !log_path.is_file() {
        bail!("log file not found: {}", log_path.display());
    }
    println!("[simulate] parsing {}", log_path.display());

    let store = Store::open(&config.relay.state_dir)?;
    let options = DispatchOptions {
        simulate: true,
        ..DispatchOptions::default()
    };
    let mut dispatcher = Dispatcher::new(Backend::Offline, store, options, clock)?
        .with_log(RelayLog::new(&config.audit_log_path())?);

    let lines = Lines::replay(LogTailer::replay(log_path), clock);
    Ok(relay::relay_lines(lines, &mut extractor(config), &mut dispatcher))
}
