//! Request block extraction state machine.
//!
//! ## State machine
//!
//! ```text
//! IDLE     → start delimiter           → IN_BLOCK (line kept as first line)
//! IDLE     → start + end on one line   → emit single-line block, stay IDLE
//! IDLE     → heuristic trigger         → emit window block, stay IDLE
//! IN_BLOCK → any non-end line          → append verbatim
//! IN_BLOCK → end delimiter             → append, emit block → IDLE
//! ```
//!
//! Blocks never nest: a start delimiter seen while collecting is content.
//! Every fed line also enters a rolling window of the last N lines, which is
//! the body of heuristic blocks.

use std::collections::VecDeque;

use crate::patterns::{self, HEURISTIC_START, HeuristicPatterns, REQUEST_END, TriggerKind};

/// Default rolling window size for heuristic blocks.
pub const DEFAULT_HEURISTIC_LINES: usize = 20;

/// How a block was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Bounded by request start/end delimiters in the worker output.
    Explicit,
    /// Synthesized from the rolling window after a trigger line.
    Heuristic(TriggerKind),
}

/// A detected request, exactly as it will be fingerprinted and archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
}

impl Block {
    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractorState {
    Idle,
    InBlock { lines: Vec<String> },
}

/// What a single line means to the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineClass {
    /// Start and end delimiter on the same line.
    StartAndEnd,
    Start,
    End,
    Plain,
}

impl LineClass {
    fn of(line: &str) -> Self {
        match (patterns::is_request_start(line), patterns::is_request_end(line)) {
            (true, true) => LineClass::StartAndEnd,
            (true, false) => LineClass::Start,
            (false, true) => LineClass::End,
            (false, false) => LineClass::Plain,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Synthesize blocks from question/completion phrasing.
    pub heuristic: bool,
    /// Rolling window size (N).
    pub window: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            heuristic: true,
            window: DEFAULT_HEURISTIC_LINES,
        }
    }
}

pub struct BlockExtractor {
    state: ExtractorState,
    config: ExtractorConfig,
    patterns: HeuristicPatterns,
    recent: VecDeque<String>,
}

impl BlockExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            state: ExtractorState::Idle,
            recent: VecDeque::with_capacity(config.window),
            patterns: HeuristicPatterns::new(),
            config,
        }
    }

    pub fn state(&self) -> &ExtractorState {
        &self.state
    }

    /// Feed one line; returns a block when one completes on this line.
    pub fn feed(&mut self, line: &str) -> Option<Block> {
        self.remember(line);

        let class = LineClass::of(line);
        let state = std::mem::replace(&mut self.state, ExtractorState::Idle);
        let (next, emitted) = match (state, class) {
            (ExtractorState::Idle, LineClass::StartAndEnd) => {
                (ExtractorState::Idle, Some(explicit(vec![line.to_string()])))
            }
            (ExtractorState::Idle, LineClass::Start) => (
                ExtractorState::InBlock {
                    lines: vec![line.to_string()],
                },
                None,
            ),
            (ExtractorState::Idle, LineClass::End | LineClass::Plain) => {
                (ExtractorState::Idle, self.heuristic_block(line))
            }
            (ExtractorState::InBlock { mut lines }, LineClass::StartAndEnd | LineClass::End) => {
                lines.push(line.to_string());
                (ExtractorState::Idle, Some(explicit(lines)))
            }
            (ExtractorState::InBlock { mut lines }, LineClass::Start | LineClass::Plain) => {
                lines.push(line.to_string());
                (ExtractorState::InBlock { lines }, None)
            }
        };
        self.state = next;
        emitted
    }

    fn remember(&mut self, line: &str) {
        if self.config.window == 0 {
            return;
        }
        if self.recent.len() >= self.config.window {
            self.recent.pop_front();
        }
        self.recent.push_back(line.to_string());
    }

    fn heuristic_block(&self, line: &str) -> Option<Block> {
        if !self.config.heuristic {
            return None;
        }
        let trigger = self.patterns.detect(line)?;
        let mut text = String::from(HEURISTIC_START);
        for recent in &self.recent {
            text.push('\n');
            text.push_str(recent);
        }
        text.push('\n');
        text.push_str(REQUEST_END);
        Some(Block {
            kind: BlockKind::Heuristic(trigger),
            text,
        })
    }
}

fn explicit(lines: Vec<String>) -> Block {
    Block {
        kind: BlockKind::Explicit,
        text: lines.join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn extractor(heuristic: bool, window: usize) -> BlockExtractor {
        BlockExtractor::new(ExtractorConfig { heuristic, window })
    }

    fn feed_all(ex: &mut BlockExtractor, lines: &[&str]) -> Vec<Block> {
        lines.iter().filter_map(|line| ex.feed(line)).collect()
    }

    #[test]
    fn starts_idle() {
        let ex = extractor(true, 20);
        assert_eq!(ex.state(), &ExtractorState::Idle);
    }

    #[test]
    fn explicit_block_includes_delimiters() {
        let mut ex = extractor(false, 20);
        let blocks = feed_all(
            &mut ex,
            &[
                "<<CONTROLLER_REQUEST id=42>>",
                "fix the bug",
                "<<CONTROLLER_REQUEST_END>>",
            ],
        );
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Explicit);
        assert_eq!(
            blocks[0].text,
            "<<CONTROLLER_REQUEST id=42>>\nfix the bug\n<<CONTROLLER_REQUEST_END>>"
        );
        assert_eq!(blocks[0].line_count(), 3);
        assert_eq!(ex.state(), &ExtractorState::Idle);
    }

    #[test]
    fn collecting_state_holds_lines() {
        let mut ex = extractor(false, 20);
        ex.feed("<<CONTROLLER_REQUEST>>");
        ex.feed("body");
        assert_eq!(
            ex.state(),
            &ExtractorState::InBlock {
                lines: vec!["<<CONTROLLER_REQUEST>>".into(), "body".into()]
            }
        );
    }

    #[test]
    fn end_delimiter_alone_is_instant_block() {
        let mut ex = extractor(false, 20);
        let block = ex.feed("<<CONTROLLER_REQUEST_END>>").unwrap();
        assert_eq!(block.text, "<<CONTROLLER_REQUEST_END>>");
        assert_eq!(block.kind, BlockKind::Explicit);
        assert_eq!(ex.state(), &ExtractorState::Idle);
    }

    #[test]
    fn start_and_end_on_one_line_is_single_line_block() {
        let mut ex = extractor(false, 20);
        let line = "<<CONTROLLER_REQUEST>> quick <<CONTROLLER_REQUEST_END>>";
        let block = ex.feed(line).unwrap();
        assert_eq!(block.text, line);
        assert_eq!(ex.state(), &ExtractorState::Idle);
    }

    #[test]
    fn nested_start_is_plain_content() {
        let mut ex = extractor(false, 20);
        let blocks = feed_all(
            &mut ex,
            &[
                "<<CONTROLLER_REQUEST>>",
                "<<CONTROLLER_REQUEST id=inner>>",
                "text",
                "<<CONTROLLER_REQUEST_END>>",
                "after",
            ],
        );
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].line_count(), 4);
        assert!(blocks[0].text.contains("id=inner"));
        assert_eq!(ex.state(), &ExtractorState::Idle);
    }

    #[test]
    fn unterminated_block_is_never_emitted() {
        let mut ex = extractor(true, 20);
        ex.feed("<<CONTROLLER_REQUEST>>");
        for i in 0..500 {
            assert!(ex.feed(&format!("line {i} should I continue?")).is_none());
        }
        assert!(matches!(ex.state(), ExtractorState::InBlock { .. }));
    }

    #[test]
    fn question_synthesizes_window_block() {
        let mut ex = extractor(true, 3);
        assert!(ex.feed("compiling").is_none());
        assert!(ex.feed("tests passing").is_none());
        assert!(ex.feed("ok").is_none());
        let block = ex.feed("Proceed with the migration?").unwrap();

        assert_eq!(block.kind, BlockKind::Heuristic(TriggerKind::Question));
        assert_eq!(
            block.text,
            "<<CONTROLLER_REQUEST heuristic>>\ntests passing\nok\nProceed with the migration?\n<<CONTROLLER_REQUEST_END>>"
        );
        assert_eq!(ex.state(), &ExtractorState::Idle);
    }

    #[test]
    fn heuristics_disabled_emit_nothing() {
        let mut ex = extractor(false, 20);
        assert!(ex.feed("Should I keep going?").is_none());
        assert!(ex.feed("All done").is_none());
    }

    #[test]
    fn heuristics_are_ignored_inside_block() {
        let mut ex = extractor(true, 20);
        ex.feed("<<CONTROLLER_REQUEST>>");
        assert!(ex.feed("Should I keep going?").is_none());
        let block = ex.feed("<<CONTROLLER_REQUEST_END>>").unwrap();
        assert_eq!(block.kind, BlockKind::Explicit);
    }

    #[test]
    fn window_includes_block_lines_fed_earlier() {
        let mut ex = extractor(true, 4);
        feed_all(
            &mut ex,
            &["<<CONTROLLER_REQUEST>>", "x", "<<CONTROLLER_REQUEST_END>>"],
        );
        let block = ex.feed("Task completed").unwrap();
        assert_eq!(block.kind, BlockKind::Heuristic(TriggerKind::Completion));
        assert!(block.text.contains("\nx\n"));
    }

    #[test]
    fn repeated_trigger_with_same_window_yields_identical_text() {
        let mut ex = extractor(true, 1);
        let first = ex.feed("Anything else?").unwrap();
        let second = ex.feed("Anything else?").unwrap();
        assert_eq!(first.text, second.text);
    }

    proptest! {
        #[test]
        fn no_block_without_end_delimiter(body in proptest::collection::vec("[a-zA-Z0-9 ?.<>_=]{0,40}", 0..60)) {
            let mut ex = extractor(true, 20);
            ex.feed("<<CONTROLLER_REQUEST id=p>>");
            for line in &body {
                if patterns::is_request_end(line) {
                    continue;
                }
                prop_assert!(ex.feed(line).is_none());
            }
        }

        #[test]
        fn heuristic_body_is_last_n_lines(
            filler in proptest::collection::vec("[a-z ]{1,30}", 0..40),
            window in 1usize..25,
        ) {
            let mut ex = extractor(true, window);
            let mut fed: Vec<String> = Vec::new();
            for line in &filler {
                ex.feed(line);
                fed.push(line.clone());
            }
            let trigger = "Proceed with the deploy?";
            fed.push(trigger.to_string());
            let block = ex.feed(trigger).unwrap();

            let body: Vec<&str> = block.text.lines().collect();
            let expected: Vec<&str> = fed[fed.len().saturating_sub(window)..]
                .iter()
                .map(String::as_str)
                .collect();
            prop_assert_eq!(&body[1..body.len() - 1], expected.as_slice());
        }
    }
}
