// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the sift-engine binary, driven by the sift client.

#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use sift::{
    AnalyzeRequest, Client, ConnectionConfig, Narrative, SessionError, SessionEvent,
    SessionOptions, UploadFile,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Helper to spawn an engine process and clean it up on drop.
struct EngineProcess {
    child: Child,
    addr: String,
}

impl EngineProcess {
    fn spawn() -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_sift-engine"))
            .arg("--bind")
            .arg("127.0.0.1:0")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn engine process");

        let stdout = child.stdout.take().expect("engine stdout");
        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .expect("read listening line");
        let addr = line
            .trim()
            .strip_prefix("listening on ")
            .unwrap_or_else(|| panic!("unexpected first line: {:?}", line))
            .to_string();

        EngineProcess { child, addr }
    }

    fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    fn client(&self) -> Client {
        let config = ConnectionConfig {
            url: self.ws_url("/ws/analyze"),
            connect_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let options = SessionOptions {
            chunk_size: 16,
            ack_timeout: Duration::from_secs(5),
            analysis_idle_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        Client::new(config, options)
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

async fn collect(mut rx: UnboundedReceiver<SessionEvent>) -> Narrative {
    let mut narrative = Narrative::default();
    while let Some(event) = rx.recv().await {
        narrative.apply(&event);
    }
    narrative
}

fn sales_request() -> AnalyzeRequest {
    AnalyzeRequest::new(
        "how did sales change?",
        vec![
            UploadFile::new("sales.csv", "region,amount\nnorth,10\nsouth,12\neast,7\n"),
            UploadFile::new("chart.png", vec![0x89, b'P', b'N', b'G', 0, 0xff]),
        ],
    )
}

#[tokio::test]
async fn client_completes_a_session_against_the_engine() {
    let engine = EngineProcess::spawn();
    let mut client = engine.client();

    let (tx, rx) = unbounded_channel();
    let collector = tokio::spawn(collect(rx));
    let completion = client.analyze(&sales_request(), tx).await.unwrap();
    let narrative = collector.await.unwrap();

    assert!(narrative.completed);
    assert_eq!(
        narrative.content,
        "sales.csv: 39 bytes, 4 lines\nchart.png: 6 bytes\n"
    );
    assert_eq!(narrative.summary, "Received 2 files totaling 45 bytes.");
    assert_eq!(
        narrative.status.as_deref(),
        Some("Preparing everything for download...")
    );
    assert_eq!(
        completion.verbal_summary.as_deref(),
        Some("Received 2 files totaling 45 bytes.")
    );
    assert!(completion.html_report.contains("how did sales change?"));

    client.disconnect().await;
}

#[tokio::test]
async fn client_reuses_its_connection_for_a_second_session() {
    let engine = EngineProcess::spawn();
    let mut client = engine.client();

    for _ in 0..2 {
        let (tx, _rx) = unbounded_channel();
        let completion = client.analyze(&sales_request(), tx).await.unwrap();
        assert!(completion.pdf_report.is_empty());
    }
    assert!(client.connection().is_ready());

    client.disconnect().await;
}

#[tokio::test]
async fn wrong_endpoint_fails_to_connect() {
    let engine = EngineProcess::spawn();
    let config = ConnectionConfig {
        url: engine.ws_url("/ws/other"),
        ..Default::default()
    };
    let mut client = Client::new(config, SessionOptions::default());

    let (tx, _rx) = unbounded_channel();
    let err = client.analyze(&sales_request(), tx).await.unwrap_err();
    assert!(matches!(err, SessionError::Connection(_)), "got {:?}", err);
}
