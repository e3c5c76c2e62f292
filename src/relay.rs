//! The relay loop: worker log lines in, blocks out, dispatched in order.

use anyhow::Result;
use tracing::{info, warn};

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::extract::BlockExtractor;

/// Counters for one relay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub lines: usize,
    pub blocks: usize,
    pub duplicates: usize,
    pub dispatched: usize,
    pub failures: usize,
}

/// Drive `lines` through the extractor and dispatch every completed block.
///
/// Read and dispatch failures are logged and the loop continues; it ends
/// only when the line source does.
pub fn relay_lines<I>(
    lines: I,
    extractor: &mut BlockExtractor,
    dispatcher: &mut Dispatcher<'_>,
) -> RelayStats
where
    I: Iterator<Item = Result<String>>,
{
    let mut stats = RelayStats::default();
    for line in lines {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to read worker log");
                stats.failures += 1;
                continue;
            }
        };
        stats.lines += 1;

        let Some(block) = extractor.feed(&line) else {
            continue;
        };
        stats.blocks += 1;
        match dispatcher.handle_block(&block) {
            Ok(DispatchOutcome::Duplicate { .. }) => stats.duplicates += 1,
            Ok(_) => stats.dispatched += 1,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "failed to handle request block");
                stats.failures += 1;
            }
        }
    }
    info!(
        lines = stats.lines,
        blocks = stats.blocks,
        duplicates = stats.duplicates,
        dispatched = stats.dispatched,
        failures = stats.failures,
        "relay finished"
    );
    stats
}
