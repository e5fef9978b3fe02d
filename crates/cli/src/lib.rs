// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! sift - client for a remote analysis engine.
//!
//! Turns a single, unreliable WebSocket into a reliable, flow-controlled
//! conversation: files are uploaded in acknowledged chunks, the channel is
//! reopened with backoff when it drops, and the engine's interleaved stream
//! of progress labels, narrative text, and report artifacts is split into
//! typed [`SessionEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐     ┌─────────┐
//! │   Client    │────►│  Connection  │────►│  Transport  │────►│ Engine  │
//! │  (analyze)  │◄────│   Manager    │◄────│   (trait)   │◄────│         │
//! └─────────────┘     └──────────────┘     └─────────────┘     └─────────┘
//!    │       │
//!    ▼       ▼
//! ┌──────┐ ┌───────┐
//! │upload│ │ demux │──► SessionEvent channel
//! └──────┘ └───────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sift::{AnalyzeRequest, Client, ClientConfig, UploadFile};
//!
//! let config = ClientConfig::default();
//! let mut client = Client::new(config.connection_config(), config.session_options());
//! let request = AnalyzeRequest::new(
//!     "How did sales change?",
//!     vec![UploadFile::new("sales.csv", std::fs::read("sales.csv")?)],
//! );
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let completion = client.analyze(&request, tx).await?;
//! ```

mod cli;
mod commands;

pub mod config;
pub mod connection;
pub mod demux;
pub mod error;
pub mod session;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod transport_tests;


pub use cli::{Cli, Command, OutputFormat};
pub use config::ClientConfig;
pub use connection::{
    ConnectionConfig, ConnectionError, ConnectionManager, DisconnectHandle, SharedConnectionState,
};
pub use demux::{Narrative, SessionEvent, SessionState};
pub use error::{Error, Result};
pub use session::{analyze, AnalyzeRequest, Client, SessionError, SessionOptions};
pub use transfer::UploadFile;
pub use transport::{Transport, TransportError, WebSocketTransport};

/// Execute a CLI command. This is the main entry point for library users
/// and provides a testable way to run commands without process execution.
pub fn run(cli: Cli) -> Result<()> {
    let mut config = ClientConfig::load_or_default(cli.config.as_deref())?;
    match cli.command {
        Command::Analyze {
            prompt,
            files,
            url,
            output,
        } => {
            if let Some(url) = url {
                config.url = url;
                config.validate()?;
            }
            commands::analyze::run(config, prompt, files, output)
        }
        Command::Config => commands::config::run(&config),
    }
}
