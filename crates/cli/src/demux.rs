// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Session event demultiplexer.
//!
//! Every classified engine event passes through [`Demultiplexer::dispatch`]
//! exactly once, in arrival order. Chunk acks go back to the transfer
//! controller; everything else becomes a [`SessionEvent`] on the caller's
//! channel. The demultiplexer also owns the session state machine:
//!
//! ```text
//! idle ─► connecting ─► uploading ─► awaiting-analysis ─► streaming-content
//!   │                      ▲              │                      │
//!   └──────────────────────┘              └─► streaming-summary ◄┘
//!
//! any non-terminal ─► completed | failed
//! ```
//!
//! Once a terminal state is reached every later event is ignored.

use std::fmt;

use sift_core::protocol::{Completion, EngineEvent};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Lifecycle of one analysis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Uploading,
    AwaitingAnalysis,
    StreamingContent,
    StreamingSummary,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Uploading => "uploading",
            SessionState::AwaitingAnalysis => "awaiting-analysis",
            SessionState::StreamingContent => "streaming-content",
            SessionState::StreamingSummary => "streaming-summary",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller observes during a session.
///
/// Terminal outcomes arrive as [`SessionEvent::Completed`] or
/// [`SessionEvent::Failed`], never as a `State` event, and exactly one of
/// them is sent per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Non-terminal state transition.
    State(SessionState),
    /// Current progress label.
    Status(String),
    /// Narrative text delta, in arrival order.
    Content(String),
    /// Verbal summary text delta, in arrival order.
    Summary(String),
    /// The completion payload arrived (it is returned by `analyze`).
    Completed,
    /// The session failed with a readable reason.
    Failed(String),
}

/// Where an engine event went.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Routed to the caller; the session goes on.
    Continue,
    /// Chunk acknowledgment for the transfer controller.
    Ack { file_name: String, chunk_index: u32 },
    /// Session completed with this payload.
    Completed(Box<Completion>),
    /// Session failed with this reason.
    Failed(String),
    /// Arrived after the session ended; dropped.
    Ignored,
}

/// Routes engine events and tracks session state.
pub struct Demultiplexer {
    events: UnboundedSender<SessionEvent>,
    state: SessionState,
    status: Option<String>,
    content_started: bool,
    summary_started: bool,
}

impl Demultiplexer {
    pub fn new(events: UnboundedSender<SessionEvent>) -> Self {
        Self {
            events,
            state: SessionState::Idle,
            status: None,
            content_started: false,
            summary_started: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Latest status label, if any.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn content_started(&self) -> bool {
        self.content_started
    }

    pub fn summary_started(&self) -> bool {
        self.summary_started
    }

    /// The channel is not ready; the session waits for it to open.
    pub fn begin_connecting(&mut self) {
        if self.state == SessionState::Idle {
            self.transition(SessionState::Connecting);
        }
    }

    /// The session was announced; chunks are about to flow.
    pub fn begin_uploading(&mut self) {
        if matches!(self.state, SessionState::Idle | SessionState::Connecting) {
            self.transition(SessionState::Uploading);
        }
    }

    /// Every chunk was acknowledged and `upload-finished` was sent.
    ///
    /// Narrative that arrived early moves the state straight on to the
    /// matching streaming state.
    pub fn upload_finished(&mut self) {
        if !self.in_upload_phase() {
            return;
        }
        self.transition(SessionState::AwaitingAnalysis);
        if self.summary_started {
            self.transition(SessionState::StreamingSummary);
        } else if self.content_started {
            self.transition(SessionState::StreamingContent);
        }
    }

    fn in_upload_phase(&self) -> bool {
        matches!(
            self.state,
            SessionState::Idle | SessionState::Connecting | SessionState::Uploading
        )
    }

    /// Routes one engine event.
    pub fn dispatch(&mut self, event: EngineEvent) -> Dispatch {
        if self.state.is_terminal() {
            debug!("ignoring event after {}: {:?}", self.state, event);
            return Dispatch::Ignored;
        }

        match event {
            EngineEvent::ChunkAck {
                file_name,
                chunk_index,
            } => Dispatch::Ack {
                file_name,
                chunk_index,
            },
            EngineEvent::Error { message } => {
                self.fail(message.clone());
                Dispatch::Failed(message)
            }
            EngineEvent::Status { label } => {
                debug!("engine status: {}", label);
                self.status = Some(label.clone());
                self.emit(SessionEvent::Status(label));
                Dispatch::Continue
            }
            EngineEvent::ContentDelta { text } => {
                if !self.content_started {
                    self.content_started = true;
                    if self.state == SessionState::AwaitingAnalysis {
                        self.transition(SessionState::StreamingContent);
                    }
                }
                self.emit(SessionEvent::Content(text));
                Dispatch::Continue
            }
            EngineEvent::SummaryDelta { text } => {
                if !self.summary_started {
                    self.summary_started = true;
                    if !self.in_upload_phase() {
                        self.transition(SessionState::StreamingSummary);
                    }
                }
                self.emit(SessionEvent::Summary(text));
                Dispatch::Continue
            }
            EngineEvent::Completion(completion) => {
                self.state = SessionState::Completed;
                self.emit(SessionEvent::Completed);
                Dispatch::Completed(completion)
            }
        }
    }

    /// Fails the session. Returns false if it had already ended.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let reason = reason.into();
        warn!("session failed in {}: {}", self.state, reason);
        self.state = SessionState::Failed;
        self.emit(SessionEvent::Failed(reason));
        true
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        debug!("session {} -> {}", self.state, next);
        self.state = next;
        self.emit(SessionEvent::State(next));
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("session event receiver dropped");
        }
    }
}

/// Folds session events into the full narrative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Narrative {
    pub status: Option<String>,
    pub content: String,
    pub summary: String,
    pub completed: bool,
    pub failure: Option<String>,
}

impl Narrative {
    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::State(_) => {}
            SessionEvent::Status(label) => self.status = Some(label.clone()),
            SessionEvent::Content(text) => self.content.push_str(text),
            SessionEvent::Summary(text) => self.summary.push_str(text),
            SessionEvent::Completed => self.completed = true,
            SessionEvent::Failed(reason) => self.failure = Some(reason.clone()),
        }
    }
}

#[cfg(test)]
#[path = "demux_tests.rs"]
mod tests;
