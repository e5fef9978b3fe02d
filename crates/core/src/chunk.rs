// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Chunk planning, encoding, and reassembly.
//!
//! A file is cut into slices of at most [`CHUNK_SIZE`] bytes. The content
//! encoding is negotiated by file extension so both peers agree on it without
//! an extra field on the wire:
//!
//! - line-oriented text formats travel as UTF-8 text; slice boundaries are
//!   moved back so they never split a character
//! - everything else travels as standard base64, one independent encoding
//!   per slice

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::FileChunk;

/// Maximum raw bytes per chunk (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Maximum number of files in one upload session.
pub const MAX_FILES: usize = 5;

/// Extensions sent as plain text.
const TEXT_EXTENSIONS: &[&str] = &[
    "csv", "tsv", "txt", "json", "jsonl", "ndjson", "md", "xml", "yaml", "yml", "log", "html",
    "htm",
];

/// How chunk content is represented on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    Text,
    Base64,
}

impl ContentEncoding {
    /// Picks the encoding for a file from its extension (case-insensitive).
    pub fn for_file_name(file_name: &str) -> Self {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext {
            Some(ext) if TEXT_EXTENSIONS.contains(&ext.as_str()) => ContentEncoding::Text,
            _ => ContentEncoding::Base64,
        }
    }

    /// Decodes chunk content back into raw bytes.
    pub fn decode(self, file_name: &str, content: &str) -> Result<Vec<u8>> {
        match self {
            ContentEncoding::Text => Ok(content.as_bytes().to_vec()),
            ContentEncoding::Base64 => STANDARD.decode(content).map_err(|source| Error::Base64 {
                field: file_name.to_string(),
                source,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Source<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

/// The chunk layout of one file.
///
/// Borrowing the file data keeps at most one encoded chunk alive at a time.
#[derive(Debug, Clone)]
pub struct ChunkPlan<'a> {
    file_name: &'a str,
    source: Source<'a>,
    ranges: Vec<Range<usize>>,
    total: u32,
}

impl<'a> ChunkPlan<'a> {
    /// Plans the chunks of `data` with slices of at most `chunk_size` bytes.
    ///
    /// An empty file still yields one (empty) chunk so the peer learns about
    /// it. Text-format files must be valid UTF-8.
    pub fn new(file_name: &'a str, data: &'a [u8], chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::ZeroChunkSize);
        }

        let source = match ContentEncoding::for_file_name(file_name) {
            ContentEncoding::Text => Source::Text(
                std::str::from_utf8(data).map_err(|_| Error::NotUtf8(file_name.to_string()))?,
            ),
            ContentEncoding::Base64 => Source::Binary(data),
        };

        let ranges = match source {
            Source::Text(text) => text_ranges(text, chunk_size),
            Source::Binary(bytes) => byte_ranges(bytes.len(), chunk_size),
        };

        let total = chunk_count(file_name, ranges.len())?;
        Ok(ChunkPlan {
            file_name,
            source,
            ranges,
            total,
        })
    }

    pub fn file_name(&self) -> &str {
        self.file_name
    }

    pub fn encoding(&self) -> ContentEncoding {
        match self.source {
            Source::Text(_) => ContentEncoding::Text,
            Source::Binary(_) => ContentEncoding::Base64,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.total
    }

    /// Raw byte length of each chunk, in order.
    pub fn chunk_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.ranges.iter().map(|r| r.len())
    }

    /// Builds the wire chunk at `index`.
    pub fn chunk(&self, index: u32) -> Option<FileChunk> {
        let range = self.ranges.get(index as usize)?.clone();
        let content = match self.source {
            Source::Text(text) => text[range].to_string(),
            Source::Binary(bytes) => STANDARD.encode(&bytes[range]),
        };
        let total_chunks = self.total_chunks();
        Some(FileChunk {
            file_name: self.file_name.to_string(),
            chunk_index: index,
            total_chunks,
            content,
            is_last_chunk: index + 1 == total_chunks,
        })
    }

    /// Iterates over all chunks in index order.
    pub fn chunks(&self) -> impl Iterator<Item = FileChunk> + '_ {
        (0..self.total_chunks()).filter_map(move |i| self.chunk(i))
    }
}

fn byte_ranges(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return vec![0..0];
    }
    (0..len)
        .step_by(chunk_size)
        .map(|start| start..usize::min(start + chunk_size, len))
        .collect()
}

/// Chunk indexes travel as u32; larger plans cannot be addressed.
fn chunk_count(file_name: &str, count: usize) -> Result<u32> {
    u32::try_from(count).map_err(|_| Error::TooManyChunks {
        file_name: file_name.to_string(),
        count,
    })
}

fn text_ranges(text: &str, chunk_size: usize) -> Vec<Range<usize>> {
    if text.is_empty() {
        return vec![0..0];
    }
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = usize::min(start + chunk_size, text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single character wider than the chunk size still has to go.
            end = start + 1;
            while !text.is_char_boundary(end) {
                end += 1;
            }
        }
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Progress reported by [`Reassembler::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkProgress {
    /// More chunks of this file are expected.
    Partial { received: u32, total: u32 },
    /// The file's last chunk arrived.
    FileComplete,
}

#[derive(Debug)]
struct PartialFile {
    encoding: ContentEncoding,
    total: Option<u32>,
    next_index: u32,
    data: Vec<u8>,
    done: bool,
}

/// Receiving side of a chunked upload.
///
/// Accepts chunks for the announced files, enforcing strict per-file order,
/// and reproduces the original bytes.
#[derive(Debug)]
pub struct Reassembler {
    order: Vec<String>,
    files: HashMap<String, PartialFile>,
}

impl Reassembler {
    /// Creates a reassembler for the announced file names.
    pub fn new<I, S>(file_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut order = Vec::new();
        let mut files = HashMap::new();
        for name in file_names {
            let name = name.into();
            if files.contains_key(&name) {
                continue;
            }
            files.insert(
                name.clone(),
                PartialFile {
                    encoding: ContentEncoding::for_file_name(&name),
                    total: None,
                    next_index: 0,
                    data: Vec::new(),
                    done: false,
                },
            );
            order.push(name);
        }
        Reassembler { order, files }
    }

    /// Accepts the next chunk of a file.
    pub fn accept(&mut self, chunk: &FileChunk) -> Result<ChunkProgress> {
        let file = self
            .files
            .get_mut(&chunk.file_name)
            .ok_or_else(|| Error::UnknownFile(chunk.file_name.clone()))?;

        if file.done {
            return Err(Error::DuplicateFile(chunk.file_name.clone()));
        }
        if chunk.chunk_index != file.next_index {
            return Err(Error::OutOfOrderChunk {
                file_name: chunk.file_name.clone(),
                expected: file.next_index,
                got: chunk.chunk_index,
            });
        }
        let total = file.total.unwrap_or(chunk.total_chunks);
        if chunk.total_chunks != total {
            return Err(Error::TotalMismatch {
                file_name: chunk.file_name.clone(),
                expected: total,
                got: chunk.total_chunks,
            });
        }
        if chunk.chunk_index >= total {
            return Err(Error::IndexOutOfRange {
                file_name: chunk.file_name.clone(),
                index: chunk.chunk_index,
                total,
            });
        }
        let is_last = chunk.chunk_index + 1 == total;
        if chunk.is_last_chunk != is_last {
            return Err(Error::LastChunkMismatch {
                file_name: chunk.file_name.clone(),
                index: chunk.chunk_index,
                total,
            });
        }

        let bytes = file.encoding.decode(&chunk.file_name, &chunk.content)?;
        file.data.extend_from_slice(&bytes);
        file.total = Some(total);
        file.next_index += 1;

        if is_last {
            file.done = true;
            Ok(ChunkProgress::FileComplete)
        } else {
            Ok(ChunkProgress::Partial {
                received: file.next_index,
                total,
            })
        }
    }

    /// Returns true once every announced file is complete.
    pub fn is_complete(&self) -> bool {
        self.files.values().all(|f| f.done)
    }

    /// Returns the reassembled files in announcement order.
    pub fn into_files(mut self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::with_capacity(self.order.len());
        for name in self.order {
            match self.files.remove(&name) {
                Some(file) if file.done => out.push((name, file.data)),
                _ => return Err(Error::IncompleteFile(name)),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
#[path = "chunk_tests.rs"]
mod tests;
