// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for sift-core operations.

use thiserror::Error;

/// All possible errors that can occur while encoding, decoding, or
/// reassembling protocol data.
#[derive(Debug, Error)]
pub enum Error {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 in '{field}': {source}")]
    Base64 {
        field: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("'{kind}' message is missing '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("file '{0}' is not valid UTF-8 text\n  hint: text formats (csv, txt, json, ...) must be UTF-8 encoded")]
    NotUtf8(String),

    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("file '{file_name}' needs {count} chunks, more than a chunk index can address")]
    TooManyChunks { file_name: String, count: usize },

    #[error("unexpected chunk for '{file_name}': expected index {expected}, got {got}")]
    OutOfOrderChunk {
        file_name: String,
        expected: u32,
        got: u32,
    },

    #[error("chunk total changed for '{file_name}': started with {expected}, got {got}")]
    TotalMismatch {
        file_name: String,
        expected: u32,
        got: u32,
    },

    #[error("chunk index {index} out of range for '{file_name}' ({total} chunks)")]
    IndexOutOfRange {
        file_name: String,
        index: u32,
        total: u32,
    },

    #[error("last-chunk flag disagrees with index {index} of {total} for '{file_name}'")]
    LastChunkMismatch {
        file_name: String,
        index: u32,
        total: u32,
    },

    #[error("file '{0}' is not part of this upload")]
    UnknownFile(String),

    #[error("file '{0}' was already received")]
    DuplicateFile(String),

    #[error("file '{0}' is incomplete")]
    IncompleteFile(String),
}

/// A specialized Result type for sift-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
