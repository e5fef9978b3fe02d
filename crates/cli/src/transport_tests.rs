// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the transport module, and the scripted mock engine shared by
//! the connection, transfer, and session tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sift_core::protocol::{ClientMessage, EngineEvent};
use tokio::sync::Notify;

use crate::transport::{Transport, TransportError, TransportResult};

/// Something the mock engine will hand to `recv()`.
#[derive(Debug, Clone)]
enum Incoming {
    Event(EngineEvent),
    Close,
    Malformed,
}

#[derive(Default)]
struct PeerState {
    connected: bool,
    /// Peer has closed; frames already written still count as sent.
    closing: bool,
    generation: u64,
    incoming: VecDeque<Incoming>,
    outgoing: Vec<ClientMessage>,
    timeline: Vec<String>,
    violations: Vec<String>,
    connect_attempts: u32,
    fail_connects: u32,
    hang_connect: bool,
    auto_ack: bool,
    ack_delay: Option<Duration>,
    close_after_sends: Option<usize>,
    sends_this_channel: usize,
    after_upload: Vec<EngineEvent>,
    unacked: Option<(String, u32)>,
}

/// Control side of the mock engine.
///
/// Cloneable; every clone (and the [`MockTransport`] built from it) sees the
/// same state.
#[derive(Clone, Default)]
pub struct MockPeer {
    state: Arc<Mutex<PeerState>>,
    notify: Arc<Notify>,
}

impl MockPeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport wired to this peer.
    pub fn transport(&self) -> MockTransport {
        MockTransport { peer: self.clone() }
    }

    /// Acknowledge every chunk as soon as it is sent.
    pub fn auto_ack(self) -> Self {
        self.state.lock().unwrap().auto_ack = true;
        self
    }

    /// Acknowledge every chunk after `delay`.
    pub fn ack_after(self, delay: Duration) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.auto_ack = true;
            state.ack_delay = Some(delay);
        }
        self
    }

    /// Close the channel once `n` messages have been sent on it.
    pub fn close_after_sends(self, n: usize) -> Self {
        self.state.lock().unwrap().close_after_sends = Some(n);
        self
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_connects(self, n: u32) -> Self {
        self.state.lock().unwrap().fail_connects = n;
        self
    }

    /// Never complete a connection attempt.
    pub fn hang_connect(self) -> Self {
        self.state.lock().unwrap().hang_connect = true;
        self
    }

    /// Events to stream once `upload-finished` arrives.
    pub fn after_upload(self, events: Vec<EngineEvent>) -> Self {
        self.state.lock().unwrap().after_upload = events;
        self
    }

    /// Queue an event for the client.
    pub fn push(&self, event: EngineEvent) {
        self.push_incoming(Incoming::Event(event));
    }

    /// Close the channel from the engine side.
    pub fn close(&self) {
        self.push_incoming(Incoming::Close);
    }

    /// Deliver a frame that cannot be decoded.
    pub fn push_malformed(&self) {
        self.push_incoming(Incoming::Malformed);
    }

    pub fn outgoing(&self) -> Vec<ClientMessage> {
        self.state.lock().unwrap().outgoing.clone()
    }

    /// Ordered log of connects, sends, and delivered acks.
    pub fn timeline(&self) -> Vec<String> {
        self.state.lock().unwrap().timeline.clone()
    }

    /// Chunks sent while the previous chunk was still unacknowledged.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    /// Number of chunk messages sent so far.
    pub fn chunks_sent(&self) -> usize {
        self.outgoing()
            .iter()
            .filter(|m| matches!(m, ClientMessage::FileChunk(_)))
            .count()
    }

    fn push_incoming(&self, incoming: Incoming) {
        self.state.lock().unwrap().incoming.push_back(incoming);
        self.notify.notify_one();
    }

    fn schedule_ack(&self, file_name: String, chunk_index: u32, delay: Duration, generation: u64) {
        let peer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let live = {
                let state = peer.state.lock().unwrap();
                state.connected && !state.closing && state.generation == generation
            };
            if live {
                peer.push(EngineEvent::chunk_ack(file_name, chunk_index));
            }
        });
    }
}

/// Mock transport for testing without real sockets.
pub struct MockTransport {
    peer: MockPeer,
}

impl MockTransport {
    pub fn new() -> Self {
        MockPeer::new().transport()
    }
}

impl Transport for MockTransport {
    fn connect(
        &mut self,
        _url: &str,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            let hang = {
                let mut state = self.peer.state.lock().unwrap();
                state.connect_attempts += 1;
                state.hang_connect
            };
            if hang {
                std::future::pending::<()>().await;
            }

            let mut state = self.peer.state.lock().unwrap();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(TransportError::ConnectionFailed("mock failure".into()));
            }
            state.connected = true;
            state.closing = false;
            state.generation += 1;
            state.sends_this_channel = 0;
            state.unacked = None;
            state.incoming.clear();
            state.timeline.push("connect".into());
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.peer.state.lock().unwrap();
            state.connected = false;
            state.timeline.push("disconnect".into());
            Ok(())
        })
    }

    fn send(
        &mut self,
        msg: ClientMessage,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>> {
        Box::pin(async move {
            let mut ack = None;
            {
                let mut state = self.peer.state.lock().unwrap();
                if !state.connected {
                    return Err(TransportError::ConnectionClosed);
                }

                let entry = match &msg {
                    ClientMessage::SessionStart { .. } => "send session-start".to_string(),
                    ClientMessage::FileChunk(chunk) => {
                        format!("send chunk {} {}", chunk.file_name, chunk.chunk_index)
                    }
                    ClientMessage::UploadFinished => "send upload-finished".to_string(),
                };
                state.timeline.push(entry);

                if let ClientMessage::FileChunk(chunk) = &msg {
                    if let Some((file, index)) = state.unacked.take() {
                        state.violations.push(format!(
                            "sent {} {} before ack of {} {}",
                            chunk.file_name, chunk.chunk_index, file, index
                        ));
                    }
                    state.unacked = Some((chunk.file_name.clone(), chunk.chunk_index));
                    if state.auto_ack && !state.closing {
                        ack = Some((
                            chunk.file_name.clone(),
                            chunk.chunk_index,
                            state.ack_delay,
                            state.generation,
                        ));
                    }
                }

                if matches!(msg, ClientMessage::UploadFinished) && !state.closing {
                    let events: Vec<EngineEvent> = state.after_upload.clone();
                    state
                        .incoming
                        .extend(events.into_iter().map(Incoming::Event));
                }

                state.outgoing.push(msg);
                state.sends_this_channel += 1;
                if state.close_after_sends == Some(state.sends_this_channel) {
                    state.closing = true;
                    state.incoming.push_back(Incoming::Close);
                }
            }

            match ack {
                Some((file, index, Some(delay), generation)) => {
                    self.peer.schedule_ack(file, index, delay, generation)
                }
                Some((file, index, None, _)) => self.peer.push(EngineEvent::chunk_ack(file, index)),
                None => self.peer.notify.notify_one(),
            }
            Ok(())
        })
    }

    fn recv(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = TransportResult<Option<EngineEvent>>> + Send + '_>> {
        Box::pin(async move {
            loop {
                {
                    let mut state = self.peer.state.lock().unwrap();
                    if !state.connected {
                        return Err(TransportError::ConnectionClosed);
                    }
                    match state.incoming.pop_front() {
                        Some(Incoming::Event(event)) => {
                            if let EngineEvent::ChunkAck {
                                file_name,
                                chunk_index,
                            } = &event
                            {
                                state.timeline.push(format!("ack {file_name} {chunk_index}"));
                                if state.unacked.as_ref() == Some(&(file_name.clone(), *chunk_index))
                                {
                                    state.unacked = None;
                                }
                            }
                            return Ok(Some(event));
                        }
                        Some(Incoming::Close) => {
                            state.connected = false;
                            return Ok(None);
                        }
                        Some(Incoming::Malformed) => {
                            state.connected = false;
                            return Err(TransportError::MalformedFrame("mock garbage".into()));
                        }
                        None => {}
                    }
                }
                self.peer.notify.notified().await;
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.peer.state.lock().unwrap().connected
    }
}

#[tokio::test]
async fn test_mock_transport_connect() {
    let mut transport = MockTransport::new();
    assert!(!transport.is_connected());

    transport.connect("ws://localhost:1234").await.unwrap();
    assert!(transport.is_connected());

    transport.disconnect().await.unwrap();
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_mock_transport_send_recv() {
    let peer = MockPeer::new().auto_ack();
    let mut transport = peer.transport();
    transport.connect("ws://localhost:1234").await.unwrap();

    let chunk = sift_core::protocol::FileChunk {
        file_name: "a.csv".into(),
        chunk_index: 0,
        total_chunks: 1,
        content: "x".into(),
        is_last_chunk: true,
    };
    transport
        .send(ClientMessage::file_chunk(chunk))
        .await
        .unwrap();

    let received = transport.recv().await.unwrap();
    assert_eq!(received, Some(EngineEvent::chunk_ack("a.csv", 0)));
    assert_eq!(
        peer.timeline(),
        vec!["connect", "send chunk a.csv 0", "ack a.csv 0"]
    );
}

#[tokio::test]
async fn test_mock_transport_close_ends_stream() {
    let peer = MockPeer::new();
    let mut transport = peer.transport();
    transport.connect("ws://localhost:1234").await.unwrap();

    peer.close();
    assert!(transport.recv().await.unwrap().is_none());
    assert!(!transport.is_connected());
    assert!(matches!(
        transport.send(ClientMessage::upload_finished()).await,
        Err(TransportError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_mock_transport_malformed_frame() {
    let peer = MockPeer::new();
    let mut transport = peer.transport();
    transport.connect("ws://localhost:1234").await.unwrap();

    peer.push_malformed();
    assert!(matches!(
        transport.recv().await,
        Err(TransportError::MalformedFrame(_))
    ));
}

#[tokio::test]
async fn test_mock_transport_connect_failure() {
    let peer = MockPeer::new().fail_connects(1);
    let mut transport = peer.transport();

    assert!(transport.connect("ws://localhost:1234").await.is_err());
    transport.connect("ws://localhost:1234").await.unwrap();
    assert_eq!(peer.connect_attempts(), 2);
}
