// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket protocol messages between the client and the analysis engine.
//!
//! The protocol is simple:
//! - Client announces a session, streams file chunks one at a time, then
//!   signals that the upload is finished
//! - Engine acknowledges every chunk, then streams status labels, narrative
//!   deltas, summary deltas, and finally a completion payload or an error
//!
//! Client messages carry a `type` tag. Engine messages are discriminated by
//! which fields are present, so they are decoded through [`EngineMessage`]
//! (the raw wire shape) and classified into [`EngineEvent`].

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `type` value of a chunk acknowledgment.
pub const CHUNK_RECEIVED: &str = "chunk-received";

/// Status label the engine attaches to its completion payload.
///
/// Informational only: a session completes on the completion payload, never
/// on this label.
pub const STATUS_COMPLETED: &str = "completed";

/// One slice of one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub file_name: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Slice content, encoded per [`crate::chunk::ContentEncoding`].
    pub content: String,
    pub is_last_chunk: bool,
}

/// Messages sent from client to engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Announce an upload about to begin.
    #[serde(rename_all = "camelCase")]
    SessionStart {
        file_names: Vec<String>,
        prompt: String,
    },

    /// One chunk of one file.
    FileChunk(FileChunk),

    /// All files sent; the engine may begin analysis.
    UploadFinished,
}

impl ClientMessage {
    /// Creates a SessionStart message.
    pub fn session_start(file_names: Vec<String>, prompt: impl Into<String>) -> Self {
        ClientMessage::SessionStart {
            file_names,
            prompt: prompt.into(),
        }
    }

    /// Creates a FileChunk message.
    pub fn file_chunk(chunk: FileChunk) -> Self {
        ClientMessage::FileChunk(chunk)
    }

    /// Creates an UploadFinished message.
    pub fn upload_finished() -> Self {
        ClientMessage::UploadFinished
    }

    /// Serializes the message to JSON.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes the message from JSON.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Final report artifacts carried by a completion payload, already decoded
/// from base64.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Raw report markup.
    pub html_report: String,
    pub pdf_report: Vec<u8>,
    /// Image bytes keyed by label (usually the plot file name).
    pub images: BTreeMap<String, Vec<u8>>,
    pub audio: Option<Vec<u8>>,
    pub verbal_summary: Option<String>,
}

/// A classified message from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Acknowledges one chunk; unblocks the next send for that file.
    ChunkAck { file_name: String, chunk_index: u32 },
    /// Session failed. Terminal.
    Error { message: String },
    /// Human-readable progress label.
    Status { label: String },
    /// Narrative text delta.
    ContentDelta { text: String },
    /// Verbal summary text delta.
    SummaryDelta { text: String },
    /// Session succeeded. Terminal.
    Completion(Box<Completion>),
}

impl EngineEvent {
    /// Creates a ChunkAck event.
    pub fn chunk_ack(file_name: impl Into<String>, chunk_index: u32) -> Self {
        EngineEvent::ChunkAck {
            file_name: file_name.into(),
            chunk_index,
        }
    }

    /// Creates an Error event.
    pub fn error(message: impl Into<String>) -> Self {
        EngineEvent::Error {
            message: message.into(),
        }
    }

    /// Creates a Status event.
    pub fn status(label: impl Into<String>) -> Self {
        EngineEvent::Status {
            label: label.into(),
        }
    }

    /// Creates a ContentDelta event.
    pub fn content(text: impl Into<String>) -> Self {
        EngineEvent::ContentDelta { text: text.into() }
    }

    /// Creates a SummaryDelta event.
    pub fn summary(text: impl Into<String>) -> Self {
        EngineEvent::SummaryDelta { text: text.into() }
    }

    /// Creates a Completion event.
    pub fn completion(completion: Completion) -> Self {
        EngineEvent::Completion(Box::new(completion))
    }

    /// Returns true for events that end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineEvent::Error { .. } | EngineEvent::Completion(_))
    }

    /// Decodes and classifies one text frame.
    ///
    /// Returns `Ok(None)` for well-formed JSON objects that carry none of the
    /// recognized fields. Invalid JSON, or invalid base64 inside a completion,
    /// is an error.
    pub fn decode(text: &str) -> Result<Option<Self>> {
        let raw: EngineMessage = serde_json::from_str(text)?;
        raw.classify()
    }

    /// Serializes the event in its wire shape.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(&EngineMessage::from(self))
    }
}

/// Raw wire shape of an engine message.
///
/// Every field is optional; the kind of message is decided by which fields
/// are present (see [`EngineMessage::classify`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(rename = "chunkIndex", default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        alias = "verbalSummaryChunk",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub verbal_summary_chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbal_summary: Option<String>,
}

impl EngineMessage {
    /// Classifies the raw message.
    ///
    /// Precedence: chunk ack, error, completion payload, status, content,
    /// summary. A completion usually also carries `status: "completed"`, so
    /// it has to be recognized before plain status.
    pub fn classify(self) -> Result<Option<EngineEvent>> {
        if self.kind.as_deref() == Some(CHUNK_RECEIVED) {
            let file_name = self.file_name.ok_or(Error::MissingField {
                kind: CHUNK_RECEIVED,
                field: "fileName",
            })?;
            let chunk_index = self.chunk_index.ok_or(Error::MissingField {
                kind: CHUNK_RECEIVED,
                field: "chunkIndex",
            })?;
            return Ok(Some(EngineEvent::ChunkAck {
                file_name,
                chunk_index,
            }));
        }

        if let Some(message) = self.error {
            return Ok(Some(EngineEvent::Error { message }));
        }

        if let Some(html_report) = self.html_content {
            let pdf_report = match self.pdf_content {
                Some(pdf) => decode_base64("pdf_content", &pdf)?,
                None => Vec::new(),
            };
            let mut images = BTreeMap::new();
            for (label, data) in self.image_data.unwrap_or_default() {
                let bytes = decode_base64(&format!("image_data.{label}"), &data)?;
                images.insert(label, bytes);
            }
            let audio = self
                .audio_content
                .map(|audio| decode_base64("audio_content", &audio))
                .transpose()?;
            return Ok(Some(EngineEvent::completion(Completion {
                html_report,
                pdf_report,
                images,
                audio,
                verbal_summary: self.verbal_summary,
            })));
        }

        if let Some(label) = self.status {
            return Ok(Some(EngineEvent::Status { label }));
        }

        if let Some(text) = self.content {
            return Ok(Some(EngineEvent::ContentDelta { text }));
        }

        if let Some(text) = self.verbal_summary_chunk {
            return Ok(Some(EngineEvent::SummaryDelta { text }));
        }

        Ok(None)
    }
}

impl From<&EngineEvent> for EngineMessage {
    fn from(event: &EngineEvent) -> Self {
        match event {
            EngineEvent::ChunkAck {
                file_name,
                chunk_index,
            } => EngineMessage {
                kind: Some(CHUNK_RECEIVED.to_string()),
                file_name: Some(file_name.clone()),
                chunk_index: Some(*chunk_index),
                ..Default::default()
            },
            EngineEvent::Error { message } => EngineMessage {
                error: Some(message.clone()),
                ..Default::default()
            },
            EngineEvent::Status { label } => EngineMessage {
                status: Some(label.clone()),
                ..Default::default()
            },
            EngineEvent::ContentDelta { text } => EngineMessage {
                content: Some(text.clone()),
                ..Default::default()
            },
            EngineEvent::SummaryDelta { text } => EngineMessage {
                verbal_summary_chunk: Some(text.clone()),
                ..Default::default()
            },
            EngineEvent::Completion(completion) => EngineMessage {
                status: Some(STATUS_COMPLETED.to_string()),
                html_content: Some(completion.html_report.clone()),
                pdf_content: Some(STANDARD.encode(&completion.pdf_report)),
                image_data: Some(
                    completion
                        .images
                        .iter()
                        .map(|(label, bytes)| (label.clone(), STANDARD.encode(bytes)))
                        .collect(),
                ),
                audio_content: completion.audio.as_ref().map(|a| STANDARD.encode(a)),
                verbal_summary: completion.verbal_summary.clone(),
                ..Default::default()
            },
        }
    }
}

fn decode_base64(field: &str, data: &str) -> Result<Vec<u8>> {
    STANDARD.decode(data).map_err(|source| Error::Base64 {
        field: field.to_string(),
        source,
    })
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
