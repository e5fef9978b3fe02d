// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Chunked transfer controller.
//!
//! Files go up one at a time, one chunk at a time. After each chunk the
//! controller waits for the engine to acknowledge that exact chunk before
//! sending the next, so at most one chunk is ever in flight. Events that
//! arrive while waiting (status labels, early narrative) are handed to the
//! demultiplexer in arrival order.
//!
//! A channel lost mid-upload is reopened, but the upload is not resumed on
//! it: the wait ends with [`ConnectionError::Reopened`](crate::connection::ConnectionError::Reopened)
//! and the session decides whether to start over.

use std::time::Duration;

use sift_core::chunk::{ChunkPlan, CHUNK_SIZE};
use sift_core::protocol::{ClientMessage, EngineEvent};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::demux::{Demultiplexer, Dispatch};
use crate::session::SessionError;
use crate::transport::Transport;

/// One input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Limits for one upload.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Raw bytes per chunk.
    pub chunk_size: usize,
    /// How long to wait for each chunk's acknowledgment.
    pub ack_timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            ack_timeout: Duration::from_secs(30),
        }
    }
}

/// Streams every file, then signals `upload-finished`.
pub async fn upload<T: Transport>(
    conn: &mut ConnectionManager<T>,
    demux: &mut Demultiplexer,
    files: &[UploadFile],
    options: &TransferOptions,
) -> Result<(), SessionError> {
    for file in files {
        let plan = ChunkPlan::new(&file.name, &file.data, options.chunk_size)
            .map_err(|e| SessionError::InvalidInput(e.to_string()))?;
        info!(
            "uploading {} ({} bytes in {} chunks)",
            file.name,
            file.data.len(),
            plan.total_chunks()
        );

        for chunk in plan.chunks() {
            let chunk_index = chunk.chunk_index;
            conn.send(ClientMessage::file_chunk(chunk)).await?;
            let deadline = Instant::now() + options.ack_timeout;
            wait_for_ack(conn, demux, &file.name, chunk_index, deadline, options.ack_timeout)
                .await?;
            debug!(
                "{} chunk {}/{} acknowledged",
                file.name,
                chunk_index + 1,
                plan.total_chunks()
            );
        }
    }

    conn.send(ClientMessage::upload_finished()).await?;
    info!("upload finished ({} files)", files.len());
    Ok(())
}

async fn wait_for_ack<T: Transport>(
    conn: &mut ConnectionManager<T>,
    demux: &mut Demultiplexer,
    file_name: &str,
    chunk_index: u32,
    deadline: Instant,
    timeout: Duration,
) -> Result<(), SessionError> {
    loop {
        let event = match tokio::time::timeout_at(deadline, conn.recv_on_channel()).await {
            Ok(event) => event?,
            Err(_) => {
                return Err(SessionError::AckTimeout {
                    file_name: file_name.to_string(),
                    chunk_index,
                    timeout,
                })
            }
        };

        // A completion before upload-finished is not a result of this upload.
        if matches!(event, EngineEvent::Completion(_)) {
            return Err(SessionError::UnexpectedCompletion);
        }

        match demux.dispatch(event) {
            Dispatch::Ack {
                file_name: acked,
                chunk_index: acked_index,
            } => {
                if acked == file_name && acked_index == chunk_index {
                    return Ok(());
                }
                warn!(
                    "ignoring ack for {} chunk {} while waiting for {} chunk {}",
                    acked, acked_index, file_name, chunk_index
                );
            }
            Dispatch::Failed(message) => return Err(SessionError::Engine(message)),
            Dispatch::Completed(_) => return Err(SessionError::UnexpectedCompletion),
            Dispatch::Continue | Dispatch::Ignored => {}
        }
    }
}

#[cfg(test)]
#[path = "transfer_tests.rs"]
mod tests;
