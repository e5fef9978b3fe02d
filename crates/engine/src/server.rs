// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server implementation.
//!
//! Accepts sessions on [`ANALYZE_PATH`], feeds each text frame to a
//! per-connection [`Conversation`], and writes the replies back in order.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use sift_core::protocol::{ClientMessage, EngineEvent};

use crate::conversation::Conversation;

/// Request path sessions are served on.
pub const ANALYZE_PATH: &str = "/ws/analyze";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Runtime knobs for the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    /// Delay before each reply, to make streaming visible to a human.
    pub pace: Duration,
}

/// Accept connections on `listener` until it fails.
pub async fn serve(listener: TcpListener, options: ServerOptions) -> Result<(), BoxError> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, options).await {
                warn!("connection error from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Rejects handshakes for any path other than [`ANALYZE_PATH`].
#[allow(clippy::result_large_err)]
fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == ANALYZE_PATH {
        return Ok(response);
    }
    let mut rejection = ErrorResponse::new(Some(format!("no endpoint at {}", request.uri().path())));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

/// Handle a single WebSocket connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    options: ServerOptions,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, check_path).await?;
    info!("new connection from {}", peer_addr);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut conversation = Conversation::new();

    while let Some(msg) = ws_stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!("client {} disconnected", peer_addr);
                break;
            }
            // Pings are answered by tungstenite; binary frames are not part
            // of the protocol.
            Ok(_) => continue,
            Err(e) => {
                warn!("websocket error from {}: {}", peer_addr, e);
                break;
            }
        };

        let replies = match ClientMessage::from_json(&text) {
            Ok(msg) => {
                debug!("received {} from {}", kind(&msg), peer_addr);
                conversation.handle(msg)
            }
            Err(e) => {
                warn!("malformed message from {}: {}", peer_addr, e);
                vec![EngineEvent::error(format!("malformed message: {}", e))]
            }
        };

        for reply in replies {
            if !options.pace.is_zero() {
                tokio::time::sleep(options.pace).await;
            }
            ws_sink.send(Message::Text(reply.to_json()?.into())).await?;
        }
    }

    info!("connection closed: {}", peer_addr);
    Ok(())
}

fn kind(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::SessionStart { .. } => "session-start",
        ClientMessage::FileChunk(_) => "file-chunk",
        ClientMessage::UploadFinished => "upload-finished",
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
