use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use macs_bridge::cli::{Cli, Command, render_config_human, render_config_json};
use macs_bridge::config::BridgeConfig;
use macs_bridge::run;
use macs_bridge::startup::{self, PaneRequest, TmuxPanes};
use macs_bridge::tmux;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "macs_bridge=warn",
        0 => "macs_bridge=info",
        1 => "macs_bridge=debug",
        _ => "macs_bridge=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (mut config, config_path) = BridgeConfig::load(&cwd)?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .macs/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Run(args) => {
            args.apply(&mut config);
            tmux::check_tmux()?;

            let request = PaneRequest {
                session: args.session.clone().or_else(tmux::current_session),
                worker_pane: args.worker_pane.clone(),
                controller_pane: args.controller_pane.clone(),
                program: config.controller.program.clone(),
                needs_controller: run::needs_controller_pane(&config),
            };
            let targets = match startup::resolve_panes(&request, &TmuxPanes) {
                Ok(targets) => targets,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            };

            let stats = run::live(&config, &targets, args.dry_run)?;
            println!(
                "\x1b[36m[bridge]\x1b[0m stopped after {} blocks ({} duplicates, {} failures)",
                stats.blocks, stats.duplicates, stats.failures
            );
        }
        Command::Simulate {
            log,
            scan,
            state_dir,
        } => {
            scan.apply(&mut config);
            if let Some(dir) = state_dir {
                config.relay.state_dir = dir;
            }
            let stats = run::simulate(&config, &log)?;
            println!(
                "[simulate] {} blocks, {} captured, {} duplicates",
                stats.blocks, stats.dispatched, stats.duplicates
            );
        }
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_deref()));
            }
        }
    }

    Ok(())
}
