// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection protocol state.
//!
//! A [`Conversation`] turns each client message into the events the engine
//! sends back. It reassembles uploads in memory and, once the upload is
//! finished, describes what it received. No analysis is performed.

use std::collections::HashSet;

use sift_core::chunk::{ContentEncoding, Reassembler, MAX_FILES};
use sift_core::protocol::{ClientMessage, Completion, EngineEvent, FileChunk};
use tracing::{debug, info, warn};

/// Progress labels sent while "analyzing".
pub const STATUS_ANALYZING: &str = "Analyzing...";
pub const STATUS_REPORT: &str = "Generating HTML report...";
pub const STATUS_DOWNLOAD: &str = "Preparing everything for download...";

enum Phase {
    Idle,
    Receiving {
        prompt: String,
        reassembler: Reassembler,
    },
}

/// Protocol state for one client connection.
pub struct Conversation {
    phase: Phase,
}

impl Conversation {
    pub fn new() -> Self {
        Conversation { phase: Phase::Idle }
    }

    /// True between `session-start` and `upload-finished`.
    pub fn is_receiving(&self) -> bool {
        matches!(self.phase, Phase::Receiving { .. })
    }

    /// Handles one client message and returns the replies, in order.
    ///
    /// Protocol violations produce an `error` reply and reset the
    /// conversation; the connection itself stays usable.
    pub fn handle(&mut self, msg: ClientMessage) -> Vec<EngineEvent> {
        match msg {
            ClientMessage::SessionStart { file_names, prompt } => {
                self.start(file_names, prompt)
            }
            ClientMessage::FileChunk(chunk) => self.accept(chunk),
            ClientMessage::UploadFinished => self.finish(),
        }
    }

    fn start(&mut self, file_names: Vec<String>, prompt: String) -> Vec<EngineEvent> {
        if self.is_receiving() {
            warn!("session-start during an upload, discarding the previous upload");
        }
        self.phase = Phase::Idle;

        if file_names.is_empty() || prompt.trim().is_empty() {
            return vec![EngineEvent::error("missing required parameters: files or prompt")];
        }
        if file_names.len() > MAX_FILES {
            return vec![EngineEvent::error(format!(
                "too many files: {} (at most {})",
                file_names.len(),
                MAX_FILES
            ))];
        }
        let mut seen = HashSet::new();
        if let Some(dup) = file_names.iter().find(|n| !seen.insert(n.as_str())) {
            return vec![EngineEvent::error(format!("duplicate file name: {}", dup))];
        }

        info!("session started: {} files", file_names.len());
        self.phase = Phase::Receiving {
            prompt,
            reassembler: Reassembler::new(file_names),
        };
        Vec::new()
    }

    fn accept(&mut self, chunk: FileChunk) -> Vec<EngineEvent> {
        let Phase::Receiving { reassembler, .. } = &mut self.phase else {
            return vec![EngineEvent::error("file-chunk before session-start")];
        };

        match reassembler.accept(&chunk) {
            Ok(progress) => {
                debug!(
                    "{} chunk {} of {}: {:?}",
                    chunk.file_name,
                    chunk.chunk_index + 1,
                    chunk.total_chunks,
                    progress
                );
                vec![EngineEvent::chunk_ack(chunk.file_name, chunk.chunk_index)]
            }
            Err(e) => {
                warn!("rejecting chunk: {}", e);
                self.phase = Phase::Idle;
                vec![EngineEvent::error(e.to_string())]
            }
        }
    }

    fn finish(&mut self) -> Vec<EngineEvent> {
        let Phase::Receiving {
            prompt,
            reassembler,
        } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return vec![EngineEvent::error("upload-finished before session-start")];
        };

        match reassembler.into_files() {
            Ok(files) => {
                info!("upload complete: {} files", files.len());
                describe(&prompt, &files)
            }
            Err(e) => vec![EngineEvent::error(e.to_string())],
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Facts about one received file.
struct FileFacts<'a> {
    name: &'a str,
    bytes: usize,
    lines: Option<usize>,
}

impl<'a> FileFacts<'a> {
    fn new(name: &'a str, data: &[u8]) -> Self {
        let lines = (ContentEncoding::for_file_name(name) == ContentEncoding::Text)
            .then(|| line_count(data));
        FileFacts {
            name,
            bytes: data.len(),
            lines,
        }
    }

    fn describe(&self) -> String {
        match self.lines {
            Some(lines) => format!("{}: {} bytes, {} lines", self.name, self.bytes, lines),
            None => format!("{}: {} bytes", self.name, self.bytes),
        }
    }
}

fn line_count(data: &[u8]) -> usize {
    let newlines = data.iter().filter(|&&b| b == b'\n').count();
    match data.last() {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    }
}

/// Replies for a finished upload: status labels, one narrative delta per
/// file, the summary in two deltas, then the completion payload.
fn describe(prompt: &str, files: &[(String, Vec<u8>)]) -> Vec<EngineEvent> {
    let facts: Vec<FileFacts<'_>> = files
        .iter()
        .map(|(name, data)| FileFacts::new(name, data))
        .collect();
    let total: usize = facts.iter().map(|f| f.bytes).sum();

    let mut events = vec![EngineEvent::status(STATUS_ANALYZING)];
    events.extend(
        facts
            .iter()
            .map(|f| EngineEvent::content(format!("{}\n", f.describe()))),
    );

    let noun = if facts.len() == 1 { "file" } else { "files" };
    let summary_head = format!("Received {} {} ", facts.len(), noun);
    let summary_tail = format!("totaling {} bytes.", total);
    events.push(EngineEvent::status(STATUS_REPORT));
    events.push(EngineEvent::summary(summary_head.clone()));
    events.push(EngineEvent::summary(summary_tail.clone()));
    events.push(EngineEvent::status(STATUS_DOWNLOAD));

    let items: String = facts
        .iter()
        .map(|f| format!("<li>{}</li>", escape_html(&f.describe())))
        .collect();
    events.push(EngineEvent::completion(Completion {
        html_report: format!(
            "<h1>Analysis</h1><p>{}</p><ul>{}</ul>",
            escape_html(prompt),
            items
        ),
        verbal_summary: Some(format!("{}{}", summary_head, summary_tail)),
        ..Default::default()
    }));
    events
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
#[path = "conversation_tests.rs"]
mod tests;
