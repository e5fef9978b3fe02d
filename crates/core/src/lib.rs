// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! sift-core: Shared library for the sift analysis client and engine
//!
//! This crate provides the wire protocol types and the chunking primitives
//! used by both the `sift` client and the `sift-engine` loopback peer. It
//! performs no I/O.

pub mod chunk;
pub mod error;
pub mod protocol;

pub use chunk::{ChunkPlan, ChunkProgress, ContentEncoding, Reassembler, CHUNK_SIZE, MAX_FILES};
pub use error::{Error, Result};
pub use protocol::{ClientMessage, Completion, EngineEvent, EngineMessage, FileChunk};
