//! Split a controller reply into worker-bound text and operator notes.

use crate::patterns::{self, Section};

/// A reply divided by its `WORKER INSTRUCTIONS:` / `NOTES:` headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitReply {
    /// Text to deliver to the worker. Falls back to the whole reply.
    pub worker: String,
    /// Operator-only notes; never delivered to the worker.
    pub notes: String,
    /// Whether a non-empty worker section was found.
    pub has_worker_section: bool,
}

/// Divide `text` into sections. Text before the first header is discarded.
pub fn split_reply(text: &str) -> SplitReply {
    let mut worker = Vec::new();
    let mut notes = Vec::new();
    let mut section = None;

    for line in text.lines() {
        if let Some((header, remainder)) = patterns::parse_section_header(line) {
            section = Some(header);
            if !remainder.is_empty() {
                target(&mut worker, &mut notes, header).push(remainder);
            }
            continue;
        }
        if let Some(current) = section {
            target(&mut worker, &mut notes, current).push(line.to_string());
        }
    }

    let worker_text = worker.join("\n").trim().to_string();
    let notes_text = notes.join("\n").trim().to_string();
    let has_worker_section = !worker_text.is_empty();

    SplitReply {
        worker: if has_worker_section {
            worker_text
        } else {
            text.to_string()
        },
        notes: notes_text,
        has_worker_section,
    }
}

fn target<'a>(
    worker: &'a mut Vec<String>,
    notes: &'a mut Vec<String>,
    section: Section,
) -> &'a mut Vec<String> {
    match section {
        Section::WorkerInstructions => worker,
        Section::Notes => notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_both_sections() {
        let reply = "WORKER INSTRUCTIONS:\n- run cargo test\n- fix failures\n\nNOTES:\nworker is close to done";
        let split = split_reply(reply);
        assert!(split.has_worker_section);
        assert_eq!(split.worker, "- run cargo test\n- fix failures");
        assert_eq!(split.notes, "worker is close to done");
    }

    #[test]
    fn inline_text_after_colon_belongs_to_section() {
        let split = split_reply("Worker instructions: ship it\nNotes: nothing else");
        assert_eq!(split.worker, "ship it");
        assert_eq!(split.notes, "nothing else");
    }

    #[test]
    fn preamble_before_first_header_is_dropped() {
        let split = split_reply("Sure, here you go.\n1. WORKER INSTRUCTIONS\nkeep going");
        assert_eq!(split.worker, "keep going");
        assert!(split.notes.is_empty());
    }

    #[test]
    fn notes_only_reply_falls_back_to_full_text() {
        let reply = "NOTES:\ncontroller could not decide";
        let split = split_reply(reply);
        assert!(!split.has_worker_section);
        assert_eq!(split.worker, reply);
        assert_eq!(split.notes, "controller could not decide");
    }

    #[test]
    fn headerless_reply_is_sent_whole() {
        let reply = "just continue";
        let split = split_reply(reply);
        assert!(!split.has_worker_section);
        assert_eq!(split.worker, "just continue");
        assert!(split.notes.is_empty());
    }

    #[test]
    fn empty_worker_section_counts_as_missing() {
        let reply = "WORKER INSTRUCTIONS:\n\nNOTES:\nn";
        let split = split_reply(reply);
        assert!(!split.has_worker_section);
        assert_eq!(split.worker, reply);
    }

    #[test]
    fn repeated_headers_append_to_same_section() {
        let split = split_reply("WORKER INSTRUCTIONS:\na\nNOTES:\nb\nWORKER INSTRUCTIONS:\nc");
        assert_eq!(split.worker, "a\nc");
        assert_eq!(split.notes, "b");
    }
}
