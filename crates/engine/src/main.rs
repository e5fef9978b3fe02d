// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! sift-engine: loopback analysis engine for the sift client.
//!
//! Speaks the session protocol on `/ws/analyze`: acknowledges every chunk,
//! reassembles the upload, and streams back a description of what it
//! received followed by a completion payload. It performs no analysis.

mod conversation;
mod server;

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use server::ServerOptions;

/// sift-engine: loopback analysis engine
#[derive(Parser, Debug)]
#[command(name = "sift-engine")]
#[command(about = "Loopback engine that speaks the sift session protocol")]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Delay before each reply, in milliseconds
    #[arg(long, default_value = "0")]
    pace_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = if args.verbose {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let listener = TcpListener::bind(args.bind).await?;
    let addr = listener.local_addr()?;
    // Scripts and tests read the bound address from this line.
    println!("listening on {}", addr);
    info!("serving ws://{}{}", addr, server::ANALYZE_PATH);

    let options = ServerOptions {
        pace: Duration::from_millis(args.pace_ms),
    };
    if !options.pace.is_zero() {
        info!("pacing replies by {:?}", options.pace);
    }

    server::serve(listener, options).await
}
