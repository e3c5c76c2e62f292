//! Delimiter grammar and heuristic trigger patterns.
//!
//! Worker and controller panes are piped raw into log files, so lines carry
//! ANSI escapes and terminal decorations. Delimiters are therefore searched
//! anywhere on a line, case-insensitively. Heuristic triggers are tested
//! against the ANSI-stripped, trimmed text.

use std::sync::LazyLock;

use regex::Regex;

/// Opening line of a request block. Also matches the request end delimiter,
/// which makes a stray end marker an instant single-line block.
static REQUEST_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<<CONTROLLER_REQUEST.*>>").unwrap());
static REQUEST_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<<CONTROLLER_REQUEST_END>>").unwrap());
static RESPONSE_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<<CONTROLLER_RESPONSE.*>>").unwrap());
static RESPONSE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<<CONTROLLER_RESPONSE_END>>").unwrap());
static CORRELATION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"id=([^\s>]+)").unwrap());
static HEADER_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s\-\*\d\.)]+\s*").unwrap());

pub const HEURISTIC_START: &str = "<<CONTROLLER_REQUEST heuristic>>";
pub const REQUEST_END: &str = "<<CONTROLLER_REQUEST_END>>";
pub const RESPONSE_END: &str = "<<CONTROLLER_RESPONSE_END>>";

pub fn is_request_start(line: &str) -> bool {
    REQUEST_START_RE.is_match(line)
}

pub fn is_request_end(line: &str) -> bool {
    REQUEST_END_RE.is_match(line)
}

pub fn is_response_start(line: &str) -> bool {
    RESPONSE_START_RE.is_match(line)
}

pub fn is_response_end(line: &str) -> bool {
    RESPONSE_END_RE.is_match(line)
}

/// Extract the `id=<token>` correlation id from a delimiter line.
pub fn correlation_id(line: &str) -> Option<String> {
    CORRELATION_ID_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Opening delimiter for a request sent to the controller.
pub fn request_start(id: &str) -> String {
    format!("<<CONTROLLER_REQUEST id={id}>>")
}

/// Reply subsections recognized in controller output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    WorkerInstructions,
    Notes,
}

impl Section {
    const LABELS: [(&'static str, Section); 2] = [
        ("worker instructions", Section::WorkerInstructions),
        ("notes", Section::Notes),
    ];
}

/// Lowercase a line and drop leading list markers (`-`, `*`, `1.`, `2)`).
pub fn normalize_header(line: &str) -> String {
    let lowered = line.trim().to_lowercase();
    HEADER_PREFIX_RE.replace(&lowered, "").into_owned()
}

/// Classify a line as a section header.
///
/// Returns the section and any text after the first colon on the same line.
pub fn parse_section_header(line: &str) -> Option<(Section, String)> {
    let header = normalize_header(&strip_ansi(line));
    let (_, section) = Section::LABELS
        .iter()
        .find(|(label, _)| header.starts_with(label))?;
    let remainder = line
        .split_once(':')
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_default();
    Some((*section, remainder))
}

/// Why a plain worker line was promoted into a heuristic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Phrasing that asks the user something.
    Ask,
    /// Phrasing that announces finished work.
    Completion,
    /// A sentence ending in a question mark.
    Question,
}

/// Compiled heuristic trigger classes, tested in order.
pub struct HeuristicPatterns {
    patterns: Vec<(Regex, TriggerKind)>,
}

impl HeuristicPatterns {
    pub fn new() -> Self {
        Self {
            patterns: vec![
                (
                    Regex::new(
                        r"(?i)\b(what would you like|do you want|should i|shall i|would you like|anything else|any other|question|ready for next steps|ready to proceed)\b",
                    )
                    .unwrap(),
                    TriggerKind::Ask,
                ),
                (
                    Regex::new(
                        r"(?i)\b(done|complete|completed|all set|finished|ready for review|ready to merge|ready for merge|awaiting your response)\b",
                    )
                    .unwrap(),
                    TriggerKind::Completion,
                ),
                (Regex::new(r"^[A-Za-z].*\?$").unwrap(), TriggerKind::Question),
            ],
        }
    }

    /// Test one raw log line against the trigger classes.
    pub fn detect(&self, line: &str) -> Option<TriggerKind> {
        let stripped = strip_ansi(line);
        let trimmed = stripped.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.patterns
            .iter()
            .find(|(regex, _)| regex.is_match(trimmed))
            .map(|(_, kind)| *kind)
    }
}

impl Default for HeuristicPatterns {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip ANSI escape sequences from pane output.
pub fn strip_ansi(input: &str) -> String {
    // CSI sequences, OSC sequences (BEL or ST terminated), two-byte escapes.
    static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[^\[\]]").unwrap()
    });
    ANSI_RE.replace_all(input, "").to_string()
}
