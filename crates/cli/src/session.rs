// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Analysis sessions.
//!
//! [`analyze`] drives one session end to end: connect if needed, announce
//! the files and prompt, upload every chunk under flow control, signal the
//! end of the upload, then consume engine events until the completion
//! payload or an error arrives. Progress is reported on the caller's
//! [`SessionEvent`] channel; the completion payload is the return value.

use std::collections::HashSet;
use std::time::Duration;

use sift_core::chunk::{ContentEncoding, CHUNK_SIZE, MAX_FILES};
use sift_core::protocol::{ClientMessage, Completion};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::connection::{ConnectionConfig, ConnectionError, ConnectionManager, DisconnectHandle};
use crate::demux::{Demultiplexer, Dispatch, SessionEvent};
use crate::transfer::{self, TransferOptions, UploadFile};
use crate::transport::{Transport, WebSocketTransport};

/// Why a session did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The request was rejected before touching the channel.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The channel could not be opened or was lost for good.
    #[error(transparent)]
    Connection(ConnectionError),

    /// The connection was closed on request.
    #[error("disconnected")]
    Disconnected,

    /// The engine reported an error.
    #[error("analysis failed: {0}")]
    Engine(String),

    /// A chunk was never acknowledged.
    #[error("no acknowledgment for {file_name} chunk {chunk_index} within {timeout:?}")]
    AckTimeout {
        file_name: String,
        chunk_index: u32,
        timeout: Duration,
    },

    /// The engine went quiet during analysis.
    #[error("no word from the analysis engine for {0:?}")]
    AnalysisTimeout(Duration),

    /// A completion payload arrived before the upload finished.
    #[error("engine completed before the upload finished")]
    UnexpectedCompletion,

    /// The channel kept dropping before the upload could finish.
    #[error("upload interrupted: channel dropped again after {restarts} restarts")]
    Interrupted { restarts: u32 },
}

impl From<ConnectionError> for SessionError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::Disconnected => SessionError::Disconnected,
            e => SessionError::Connection(e),
        }
    }
}

impl SessionError {
    /// Failures after which the channel may still carry traffic for the
    /// abandoned session.
    fn poisons_channel(&self) -> bool {
        matches!(
            self,
            SessionError::AckTimeout { .. }
                | SessionError::AnalysisTimeout(_)
                | SessionError::UnexpectedCompletion
        )
    }

    /// Failures that mean the engine lost the conversation mid-upload, so
    /// the upload can start over on a fresh channel.
    fn restarts_upload(&self) -> bool {
        matches!(
            self,
            SessionError::Connection(ConnectionError::Reopened | ConnectionError::Transport(_))
        )
    }
}

/// Files and prompt for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeRequest {
    pub files: Vec<UploadFile>,
    pub prompt: String,
}

impl AnalyzeRequest {
    pub fn new(prompt: impl Into<String>, files: Vec<UploadFile>) -> Self {
        Self {
            files,
            prompt: prompt.into(),
        }
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }

    /// Rejects requests the engine could never accept.
    pub fn validate(&self, max_files: usize) -> Result<(), SessionError> {
        if self.files.is_empty() {
            return Err(SessionError::InvalidInput("no files to analyze".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(SessionError::InvalidInput("prompt is empty".into()));
        }
        if self.files.len() > max_files {
            return Err(SessionError::InvalidInput(format!(
                "too many files: {} (at most {})",
                self.files.len(),
                max_files
            )));
        }

        let mut seen = HashSet::new();
        for file in &self.files {
            if file.name.is_empty() {
                return Err(SessionError::InvalidInput("file name is empty".into()));
            }
            if !seen.insert(file.name.as_str()) {
                return Err(SessionError::InvalidInput(format!(
                    "duplicate file name: {}",
                    file.name
                )));
            }
            if ContentEncoding::for_file_name(&file.name) == ContentEncoding::Text
                && std::str::from_utf8(&file.data).is_err()
            {
                return Err(SessionError::InvalidInput(format!(
                    "{} is not valid UTF-8",
                    file.name
                )));
            }
        }
        Ok(())
    }
}

/// Session limits and timeouts.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub chunk_size: usize,
    pub max_files: usize,
    pub ack_timeout: Duration,
    /// Longest silence tolerated between engine events after the upload.
    pub analysis_idle_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_files: MAX_FILES,
            ack_timeout: Duration::from_secs(30),
            analysis_idle_timeout: Duration::from_secs(300),
        }
    }
}

impl SessionOptions {
    fn transfer(&self) -> TransferOptions {
        TransferOptions {
            chunk_size: self.chunk_size,
            ack_timeout: self.ack_timeout,
        }
    }
}

/// Runs one analysis session on `conn`.
///
/// Exactly one of [`SessionEvent::Completed`] or [`SessionEvent::Failed`] is
/// sent on `events` before this returns.
pub async fn analyze<T: Transport>(
    conn: &mut ConnectionManager<T>,
    request: &AnalyzeRequest,
    options: &SessionOptions,
    events: UnboundedSender<SessionEvent>,
) -> Result<Completion, SessionError> {
    let mut demux = Demultiplexer::new(events);
    match run(conn, &mut demux, request, options).await {
        Ok(completion) => {
            info!("analysis completed");
            Ok(completion)
        }
        Err(e) => {
            if e.poisons_channel() {
                conn.reset().await;
            }
            demux.fail(e.to_string());
            Err(e)
        }
    }
}

async fn run<T: Transport>(
    conn: &mut ConnectionManager<T>,
    demux: &mut Demultiplexer,
    request: &AnalyzeRequest,
    options: &SessionOptions,
) -> Result<Completion, SessionError> {
    request.validate(options.max_files)?;

    // The engine may have closed the channel since the last session.
    conn.poll_closed();

    let max_restarts = conn.config().max_reconnect_attempts;
    let mut restarts = 0;
    loop {
        if !conn.is_ready() {
            demux.begin_connecting();
            conn.connect().await?;
        }

        match announce_and_upload(conn, demux, request, options).await {
            Ok(()) => break,
            Err(e) if e.restarts_upload() => {
                if restarts == max_restarts {
                    return Err(SessionError::Interrupted { restarts });
                }
                restarts += 1;
                warn!("{}; restarting upload ({}/{})", e, restarts, max_restarts);
            }
            Err(e) => return Err(e),
        }
    }
    demux.upload_finished();

    loop {
        let event = match tokio::time::timeout(options.analysis_idle_timeout, conn.recv()).await {
            Ok(event) => event?,
            Err(_) => return Err(SessionError::AnalysisTimeout(options.analysis_idle_timeout)),
        };

        match demux.dispatch(event) {
            Dispatch::Completed(completion) => return Ok(*completion),
            Dispatch::Failed(message) => return Err(SessionError::Engine(message)),
            Dispatch::Ack {
                file_name,
                chunk_index,
            } => warn!(
                "ignoring ack for {} chunk {} after the upload",
                file_name, chunk_index
            ),
            Dispatch::Continue | Dispatch::Ignored => {}
        }
    }
}

async fn announce_and_upload<T: Transport>(
    conn: &mut ConnectionManager<T>,
    demux: &mut Demultiplexer,
    request: &AnalyzeRequest,
    options: &SessionOptions,
) -> Result<(), SessionError> {
    conn.send(ClientMessage::session_start(
        request.file_names(),
        request.prompt.clone(),
    ))
    .await?;
    demux.begin_uploading();
    transfer::upload(conn, demux, &request.files, &options.transfer()).await
}

/// Client for the analysis engine.
///
/// Owns the connection; sessions run one at a time through `&mut self`.
pub struct Client<T: Transport = WebSocketTransport> {
    conn: ConnectionManager<T>,
    options: SessionOptions,
}

impl Client<WebSocketTransport> {
    /// Create a client with the default WebSocket transport.
    pub fn new(config: ConnectionConfig, options: SessionOptions) -> Self {
        Self::with_transport(config, options, WebSocketTransport::new())
    }
}

impl<T: Transport> Client<T> {
    /// Create a client with a custom transport (for testing).
    pub fn with_transport(config: ConnectionConfig, options: SessionOptions, transport: T) -> Self {
        Self {
            conn: ConnectionManager::with_transport(config, transport),
            options,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<T> {
        &mut self.conn
    }

    /// Handle that cancels the current channel from another task.
    pub fn disconnect_handle(&self) -> DisconnectHandle {
        self.conn.disconnect_handle()
    }

    pub async fn connect(&mut self) -> Result<(), SessionError> {
        Ok(self.conn.connect().await?)
    }

    pub async fn disconnect(&mut self) {
        self.conn.disconnect().await;
    }

    /// Run one analysis session.
    pub async fn analyze(
        &mut self,
        request: &AnalyzeRequest,
        events: UnboundedSender<SessionEvent>,
    ) -> Result<Completion, SessionError> {
        analyze(&mut self.conn, request, &self.options, events).await
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
