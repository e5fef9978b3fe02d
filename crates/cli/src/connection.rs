// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection management for the engine channel.
//!
//! A [`ConnectionManager`] owns the single physical channel. It opens the
//! channel on demand, notices when it goes away (close, reset, or a garbled
//! frame), and reopens it with exponential backoff while a caller is waiting
//! on it. An explicit [`ConnectionManager::disconnect`] (or a
//! [`DisconnectHandle`] fired from another task) suppresses reconnection and
//! fails whatever is waiting.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use sift_core::protocol::{ClientMessage, EngineEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{Transport, TransportError, WebSocketTransport};

/// Values held by [`SharedConnectionState`].
pub const STATE_DISCONNECTED: u8 = 0;
pub const STATE_CONNECTING: u8 = 1;
pub const STATE_CONNECTED: u8 = 2;
pub const STATE_BACKING_OFF: u8 = 3;

/// Connection state visible to the session task and any observer.
///
/// Uses atomic fields for lock-free reads from other tasks.
pub struct SharedConnectionState {
    /// One of the `STATE_*` values.
    state: AtomicU8,
    /// Reconnect attempt in progress, 0 when none.
    attempt: AtomicU32,
}

impl SharedConnectionState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_DISCONNECTED),
            attempt: AtomicU32::new(0),
        }
    }

    pub fn get(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub fn set(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }

    pub fn set_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Release);
    }

    /// The "ready" signal: true only while the channel is open.
    pub fn is_connected(&self) -> bool {
        self.get() == STATE_CONNECTED
    }

    pub fn is_connecting(&self) -> bool {
        self.get() == STATE_CONNECTING
    }

    /// Waiting out a reconnect delay.
    pub fn is_backing_off(&self) -> bool {
        self.get() == STATE_BACKING_OFF
    }

    /// Status line for display, e.g. `reconnecting (attempt 2)`.
    pub fn status_string(&self) -> String {
        match self.get() {
            STATE_DISCONNECTED => "disconnected".to_string(),
            STATE_CONNECTING => {
                let attempt = self.attempt();
                if attempt > 0 {
                    format!("connecting (attempt {})", attempt)
                } else {
                    "connecting".to_string()
                }
            }
            STATE_CONNECTED => "connected".to_string(),
            STATE_BACKING_OFF => format!("reconnecting (attempt {})", self.attempt()),
            _ => "unknown".to_string(),
        }
    }
}

impl Default for SharedConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff schedule.
///
/// Delays start at `base` and double on each attempt; after `max_attempts`
/// delays the schedule is exhausted.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The delay the next attempt would wait.
    pub fn current_delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// Returns the next delay, or `None` once the attempt ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.current_delay();
        self.attempt += 1;
        Some(delay)
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Back to the floor delay with a fresh attempt budget.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Spend the whole budget so no further attempt is scheduled.
    pub fn exhaust(&mut self) {
        self.attempt = self.max_attempts;
    }
}

/// Where the engine lives and how hard to try reaching it.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// URL to connect to.
    pub url: String,
    /// Maximum time to wait for the channel to open.
    pub connect_timeout: Duration,
    /// First reconnect delay; doubles on each attempt.
    pub reconnect_base_delay: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws/analyze".to_string(),
            connect_timeout: Duration::from_secs(5),
            reconnect_base_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// Error type for connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The channel did not open in time.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// Reconnection budget spent.
    #[error("connection lost: gave up after {attempts} reconnection attempts")]
    RetriesExhausted { attempts: u32 },

    /// Not connected.
    #[error("not connected to the analysis engine")]
    NotConnected,

    /// The connection was closed on request.
    #[error("disconnected")]
    Disconnected,

    /// The channel was lost and reopened while waiting on it; the engine on
    /// the new channel knows nothing of the earlier conversation.
    #[error("channel was reopened")]
    Reopened,
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Fires `disconnect` semantics from another task.
///
/// A handle belongs to the connection generation it was taken from: after an
/// explicit reconnect, take a new handle.
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    token: CancellationToken,
}

impl DisconnectHandle {
    /// Suppress reconnection and fail every pending wait on the channel.
    pub fn disconnect(&self) {
        self.token.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Owns the single engine channel.
pub struct ConnectionManager<T: Transport = WebSocketTransport> {
    config: ConnectionConfig,
    /// Transport layer.
    transport: T,
    /// Reconnect schedule.
    backoff: Backoff,
    /// Shared state for status reporting.
    shared_state: Arc<SharedConnectionState>,
    /// Cancelled by an explicit disconnect.
    cancel_token: CancellationToken,
    /// The channel went away without being asked to.
    lost: bool,
}

impl ConnectionManager<WebSocketTransport> {
    /// Create a connection manager with the default WebSocket transport.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_transport(config, WebSocketTransport::new())
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a connection manager with a custom transport (for testing).
    pub fn with_transport(config: ConnectionConfig, transport: T) -> Self {
        let backoff = Backoff::new(config.reconnect_base_delay, config.max_reconnect_attempts);
        Self {
            config,
            transport,
            backoff,
            shared_state: Arc::new(SharedConnectionState::new()),
            cancel_token: CancellationToken::new(),
            lost: false,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Shared status view for other tasks.
    pub fn shared_state(&self) -> Arc<SharedConnectionState> {
        Arc::clone(&self.shared_state)
    }

    /// Handle that disconnects this manager from another task.
    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            token: self.cancel_token.clone(),
        }
    }

    /// True while the channel is open and usable.
    pub fn is_ready(&self) -> bool {
        self.shared_state.is_connected()
            && self.transport.is_connected()
            && !self.cancel_token.is_cancelled()
    }

    /// Reconnect attempts made since the channel was last open.
    pub fn attempts(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Delay the next reconnect attempt would wait.
    pub fn current_delay(&self) -> Duration {
        self.backoff.current_delay()
    }

    /// Open the channel if it is not already open.
    ///
    /// Idempotent. After an explicit disconnect this re-enables automatic
    /// reconnection. If the channel was lost, reopening follows the backoff
    /// schedule.
    pub async fn connect(&mut self) -> ConnectionResult<()> {
        self.poll_closed();
        if self.is_ready() {
            return Ok(());
        }

        if self.cancel_token.is_cancelled() {
            self.close_transport().await;
            self.cancel_token = CancellationToken::new();
            self.backoff.reset();
            self.lost = false;
        }

        if self.lost {
            self.reconnect().await
        } else {
            self.open().await
        }
    }

    /// Close the channel and stop reconnecting. Idempotent.
    pub async fn disconnect(&mut self) {
        self.cancel_token.cancel();
        self.backoff.exhaust();
        self.lost = false;
        self.close_transport().await;
        info!("disconnected from analysis engine");
    }

    /// Drop the current channel without disabling reconnection.
    ///
    /// Used when the conversation on the channel can no longer be trusted
    /// (a stalled upload, a silent engine). The next `connect()` opens a
    /// fresh channel immediately.
    pub async fn reset(&mut self) {
        self.lost = false;
        self.backoff.reset();
        self.close_transport().await;
        debug!("channel reset");
    }

    /// Send one message on the open channel.
    pub async fn send(&mut self, msg: ClientMessage) -> ConnectionResult<()> {
        if self.cancel_token.is_cancelled() {
            return Err(self.honor_disconnect().await);
        }
        if !self.is_ready() {
            if self.notice_dropped_channel() {
                return Err(TransportError::ConnectionClosed.into());
            }
            return Err(ConnectionError::NotConnected);
        }

        match self.transport.send(msg).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.on_closed(&e.to_string());
                Err(e.into())
            }
        }
    }

    /// Looks for a close the engine sent while nobody was reading.
    ///
    /// Only frames already delivered are consumed; this never waits. Events
    /// left over from a finished session are dropped. Returns true if the
    /// channel turned out to be gone.
    pub fn poll_closed(&mut self) -> bool {
        while self.is_ready() {
            match self.transport.recv().now_or_never() {
                None => return false,
                Some(Ok(Some(event))) => debug!("dropping stale event: {:?}", event),
                Some(Ok(None)) => {
                    self.on_closed("closed by peer while idle");
                    return true;
                }
                Some(Err(e)) => {
                    self.on_closed(&e.to_string());
                    return true;
                }
            }
        }
        self.notice_dropped_channel()
    }

    /// Receive the next engine event.
    ///
    /// If the channel is lost while waiting, it is reopened following the
    /// backoff schedule and the wait continues on the new channel. Fails once
    /// the schedule is exhausted or on disconnect.
    pub async fn recv(&mut self) -> ConnectionResult<EngineEvent> {
        self.recv_inner(true).await
    }

    /// Like [`recv`](Self::recv), but the wait ends once a lost channel has
    /// been reopened, with [`ConnectionError::Reopened`].
    pub async fn recv_on_channel(&mut self) -> ConnectionResult<EngineEvent> {
        self.recv_inner(false).await
    }

    async fn recv_inner(&mut self, follow_reconnect: bool) -> ConnectionResult<EngineEvent> {
        loop {
            if self.cancel_token.is_cancelled() {
                return Err(self.honor_disconnect().await);
            }
            if !self.is_ready() {
                self.notice_dropped_channel();
                if !self.lost {
                    return Err(ConnectionError::NotConnected);
                }
                self.reconnect().await?;
                if !follow_reconnect {
                    return Err(ConnectionError::Reopened);
                }
            }

            let cancel_token = self.cancel_token.clone();
            let received = tokio::select! {
                _ = cancel_token.cancelled() => {
                    return Err(self.honor_disconnect().await);
                }
                received = self.transport.recv() => received,
            };

            match received {
                Ok(Some(event)) => return Ok(event),
                Ok(None) => self.on_closed("closed by peer"),
                Err(e) => self.on_closed(&e.to_string()),
            }
        }
    }

    /// Single open attempt bounded by the connect timeout.
    async fn open(&mut self) -> ConnectionResult<()> {
        self.shared_state.set(STATE_CONNECTING);
        debug!("connecting to {}", self.config.url);

        let cancel_token = self.cancel_token.clone();
        let timeout = self.config.connect_timeout;
        let result = tokio::select! {
            _ = cancel_token.cancelled() => {
                return Err(self.honor_disconnect().await);
            }
            result = tokio::time::timeout(timeout, self.transport.connect(&self.config.url)) => result,
        };

        match result {
            Ok(Ok(())) => {
                self.lost = false;
                self.backoff.reset();
                self.shared_state.set_attempt(0);
                self.shared_state.set(STATE_CONNECTED);
                info!("connected to {}", self.config.url);
                Ok(())
            }
            Ok(Err(e)) => {
                self.shared_state.set(STATE_DISCONNECTED);
                Err(e.into())
            }
            Err(_) => {
                self.shared_state.set(STATE_DISCONNECTED);
                Err(ConnectionError::Timeout(timeout))
            }
        }
    }

    /// Reopen a lost channel with exponential backoff.
    async fn reconnect(&mut self) -> ConnectionResult<()> {
        loop {
            let Some(delay) = self.backoff.next_delay() else {
                let attempts = self.backoff.attempt();
                self.shared_state.set(STATE_DISCONNECTED);
                // The failure is reported once; a later connect() starts fresh.
                self.lost = false;
                self.backoff.reset();
                warn!("giving up after {} reconnection attempts", attempts);
                return Err(ConnectionError::RetriesExhausted { attempts });
            };

            let attempt = self.backoff.attempt();
            self.shared_state.set_attempt(attempt);
            self.shared_state.set(STATE_BACKING_OFF);
            debug!("reconnect attempt {} in {:?}", attempt, delay);

            let cancel_token = self.cancel_token.clone();
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    return Err(self.honor_disconnect().await);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.open().await {
                Ok(()) => return Ok(()),
                Err(ConnectionError::Disconnected) => return Err(ConnectionError::Disconnected),
                Err(e) => warn!("reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }

    /// Returns true if the transport dropped a channel we still thought open.
    fn notice_dropped_channel(&mut self) -> bool {
        if self.shared_state.is_connected() && !self.transport.is_connected() {
            self.on_closed("channel dropped");
            return true;
        }
        false
    }

    /// Record an unexpected loss of the channel.
    fn on_closed(&mut self, reason: &str) {
        self.shared_state.set(STATE_DISCONNECTED);
        self.lost = !self.cancel_token.is_cancelled();
        warn!("connection lost: {}", reason);
    }

    /// Finish a disconnect requested through a handle.
    async fn honor_disconnect(&mut self) -> ConnectionError {
        self.backoff.exhaust();
        self.lost = false;
        self.close_transport().await;
        ConnectionError::Disconnected
    }

    async fn close_transport(&mut self) {
        if self.transport.is_connected() {
            if let Err(e) = self.transport.disconnect().await {
                debug!("transport disconnect failed: {}", e);
            }
        }
        self.shared_state.set(STATE_DISCONNECTED);
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
