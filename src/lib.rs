//! Relay between a worker agent's tmux pane and a controller agent.
//!
//! Worker output is tailed from a pipe-pane log, request blocks are extracted
//! and deduplicated, a controller backend produces a reply, and the worker
//! section of that reply is typed back into the worker pane.

pub mod archive;
pub mod backend;
pub mod cli;
pub mod clock;
pub mod config;
pub mod correlate;
pub mod dedup;
pub mod dispatch;
pub mod endpoint;
pub mod extract;
pub mod lock;
pub mod log;
pub mod patterns;
pub mod relay;
pub mod run;
pub mod split;
pub mod startup;
pub mod tail;
pub mod tmux;
