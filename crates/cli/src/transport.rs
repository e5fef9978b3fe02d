// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The raw duplex channel to the engine.
//!
//! [`Transport`] is the seam between the connection manager and the wire.
//! [`WebSocketTransport`] speaks JSON text frames over tokio-tungstenite;
//! tests substitute a scripted peer.

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use sift_core::protocol::{ClientMessage, EngineEvent};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not open channel: {0}")]
    ConnectionFailed(String),

    /// The channel is not open, or the peer closed it.
    #[error("channel closed")]
    ConnectionClosed,

    /// The socket failed mid-session.
    #[error("channel broken: {0}")]
    Broken(String),

    /// The peer sent something that is not a protocol message.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("could not encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// A message channel to the engine.
///
/// Implementations drop their channel on any failure, so `is_connected`
/// turns false as soon as an error is returned.
pub trait Transport: Send + Sync {
    fn connect(&mut self, url: &str) -> TransportFuture<'_, ()>;

    /// Close the channel. Closing a closed channel is a no-op.
    fn disconnect(&mut self) -> TransportFuture<'_, ()>;

    fn send(&mut self, msg: ClientMessage) -> TransportFuture<'_, ()>;

    /// Next classified engine event, or `None` once the peer has closed.
    ///
    /// Well-formed messages with no recognized fields are skipped.
    fn recv(&mut self) -> TransportFuture<'_, Option<EngineEvent>>;

    fn is_connected(&self) -> bool;
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Channel {
    outbound: SplitSink<Socket, Message>,
    inbound: SplitStream<Socket>,
}

/// [`Transport`] over a tokio-tungstenite WebSocket.
#[derive(Default)]
pub struct WebSocketTransport {
    channel: Option<Channel>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn write(&mut self, text: String) -> TransportResult<()> {
        let channel = self.channel.as_mut().ok_or(TransportError::ConnectionClosed)?;
        // Flushing here surfaces a dead peer on this send, not the next one.
        let result = match channel.outbound.feed(Message::Text(text.into())).await {
            Ok(()) => channel.outbound.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            self.channel = None;
            TransportError::Broken(e.to_string())
        })
    }

    async fn read(&mut self) -> TransportResult<Option<EngineEvent>> {
        let channel = self.channel.as_mut().ok_or(TransportError::ConnectionClosed)?;
        let outcome = loop {
            let text = match channel.inbound.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    debug!("engine closed the channel: {:?}", frame);
                    break Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(TransportError::Broken(e.to_string())),
                None => break Ok(None),
            };
            match EngineEvent::decode(&text) {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => trace!("skipping unrecognized message: {}", text.as_str()),
                Err(e) => break Err(TransportError::MalformedFrame(e.to_string())),
            }
        };
        self.channel = None;
        outcome
    }
}

impl Transport for WebSocketTransport {
    fn connect(&mut self, url: &str) -> TransportFuture<'_, ()> {
        let url = url.to_string();
        Box::pin(async move {
            let (socket, response) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            debug!("opened {} ({})", url, response.status());
            let (outbound, inbound) = socket.split();
            self.channel = Some(Channel { outbound, inbound });
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut channel) = self.channel.take() {
                if let Err(e) = channel.outbound.close().await {
                    debug!("close handshake failed: {}", e);
                }
            }
            Ok(())
        })
    }

    fn send(&mut self, msg: ClientMessage) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let text = msg.to_json()?;
            self.write(text).await
        })
    }

    fn recv(&mut self) -> TransportFuture<'_, Option<EngineEvent>> {
        Box::pin(self.read())
    }

    fn is_connected(&self) -> bool {
        self.channel.is_some()
    }
}
