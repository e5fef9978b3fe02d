// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::connection::ConnectionConfig;
use crate::demux::SessionEvent;
use crate::transport_tests::{MockPeer, MockTransport};
use sift_core::protocol::Completion;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

async fn connected(peer: &MockPeer) -> ConnectionManager<MockTransport> {
    let mut conn = ConnectionManager::with_transport(ConnectionConfig::default(), peer.transport());
    conn.connect().await.unwrap();
    conn
}

fn uploading_demux() -> (Demultiplexer, UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = unbounded_channel();
    let mut demux = Demultiplexer::new(tx);
    demux.begin_uploading();
    (demux, rx)
}

fn small_chunks(chunk_size: usize) -> TransferOptions {
    TransferOptions {
        chunk_size,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn three_mib_csv_is_acked_chunk_by_chunk() {
    let peer = MockPeer::new().auto_ack();
    let mut conn = connected(&peer).await;
    let (mut demux, _rx) = uploading_demux();
    let files = vec![UploadFile::new("big.csv", vec![b'7'; 3 * CHUNK_SIZE])];

    upload(&mut conn, &mut demux, &files, &TransferOptions::default())
        .await
        .unwrap();

    assert_eq!(
        peer.timeline(),
        vec![
            "connect",
            "send chunk big.csv 0",
            "ack big.csv 0",
            "send chunk big.csv 1",
            "ack big.csv 1",
            "send chunk big.csv 2",
            "ack big.csv 2",
            "send upload-finished",
        ]
    );
    assert!(peer.violations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delayed_acks_hold_back_the_next_chunk() {
    let peer = MockPeer::new().ack_after(Duration::from_millis(250));
    let mut conn = connected(&peer).await;
    let (mut demux, _rx) = uploading_demux();
    let files = vec![
        UploadFile::new("a.csv", "x".repeat(10)),
        UploadFile::new("b.bin", vec![1u8; 7]),
        UploadFile::new("c.txt", ""),
    ];

    let started = Instant::now();
    upload(&mut conn, &mut demux, &files, &small_chunks(4))
        .await
        .unwrap();

    // 3 + 2 + 1 chunks, each held until its ack arrives.
    assert_eq!(started.elapsed(), Duration::from_millis(6 * 250));
    assert_eq!(peer.chunks_sent(), 6);
    assert!(peer.violations().is_empty());

    let order: Vec<String> = peer
        .timeline()
        .into_iter()
        .filter(|e| e.starts_with("send chunk"))
        .collect();
    assert_eq!(
        order,
        vec![
            "send chunk a.csv 0",
            "send chunk a.csv 1",
            "send chunk a.csv 2",
            "send chunk b.bin 0",
            "send chunk b.bin 1",
            "send chunk c.txt 0",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn non_matching_ack_is_ignored() {
    let peer = MockPeer::new();
    let conn = connected(&peer).await;
    let files = vec![UploadFile::new("a.csv", "x")];

    let task = tokio::spawn(async move {
        let mut conn = conn;
        let (mut demux, _rx) = uploading_demux();
        upload(&mut conn, &mut demux, &files, &TransferOptions::default()).await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    peer.push(EngineEvent::chunk_ack("a.csv", 5));
    peer.push(EngineEvent::chunk_ack("other.csv", 0));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(peer.outgoing().len(), 1);

    peer.push(EngineEvent::chunk_ack("a.csv", 0));
    task.await.unwrap().unwrap();
    assert!(matches!(
        peer.outgoing().last(),
        Some(ClientMessage::UploadFinished)
    ));
}

#[tokio::test(start_paused = true)]
async fn events_during_upload_reach_the_caller() {
    let peer = MockPeer::new();
    let conn = connected(&peer).await;
    let files = vec![UploadFile::new("a.csv", "x")];

    let task = tokio::spawn(async move {
        let mut conn = conn;
        let (mut demux, mut rx) = uploading_demux();
        let result = upload(&mut conn, &mut demux, &files, &TransferOptions::default()).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (result, events)
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    peer.push(EngineEvent::status("Receiving files..."));
    peer.push(EngineEvent::chunk_ack("a.csv", 0));

    let (result, events) = task.await.unwrap();
    result.unwrap();
    assert!(events.contains(&SessionEvent::Status("Receiving files...".into())));
}

#[tokio::test(start_paused = true)]
async fn engine_error_aborts_upload() {
    let peer = MockPeer::new();
    let conn = connected(&peer).await;
    let files = vec![UploadFile::new("a.csv", "xxxxxxxx")];

    let task = tokio::spawn(async move {
        let mut conn = conn;
        let (mut demux, _rx) = uploading_demux();
        upload(&mut conn, &mut demux, &files, &small_chunks(4)).await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    peer.push(EngineEvent::error("unsupported file"));

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Engine(ref m) if m == "unsupported file"));
    assert_eq!(peer.chunks_sent(), 1);
    assert!(!peer
        .outgoing()
        .iter()
        .any(|m| matches!(m, ClientMessage::UploadFinished)));
}

#[tokio::test(start_paused = true)]
async fn completion_during_upload_is_rejected() {
    let peer = MockPeer::new();
    let conn = connected(&peer).await;
    let files = vec![UploadFile::new("a.csv", "x")];

    let task = tokio::spawn(async move {
        let mut conn = conn;
        let (mut demux, _rx) = uploading_demux();
        let result = upload(&mut conn, &mut demux, &files, &TransferOptions::default()).await;
        (result, demux.state())
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    peer.push(EngineEvent::completion(Completion::default()));

    let (result, state) = task.await.unwrap();
    assert!(matches!(result, Err(SessionError::UnexpectedCompletion)));
    assert!(!state.is_terminal());
}

#[tokio::test(start_paused = true)]
async fn missing_ack_times_out() {
    let peer = MockPeer::new();
    let mut conn = connected(&peer).await;
    let (mut demux, _rx) = uploading_demux();
    let files = vec![UploadFile::new("a.csv", "xxxxxxxx")];

    let started = Instant::now();
    let err = upload(&mut conn, &mut demux, &files, &small_chunks(4))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::AckTimeout {
            ref file_name,
            chunk_index: 0,
            ..
        } if file_name == "a.csv"
    ));
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(peer.chunks_sent(), 1);
}

#[tokio::test(start_paused = true)]
async fn text_file_that_is_not_utf8_is_invalid_input() {
    let peer = MockPeer::new().auto_ack();
    let mut conn = connected(&peer).await;
    let (mut demux, _rx) = uploading_demux();
    let files = vec![UploadFile::new("bad.csv", vec![0xff, 0xfe])];

    let err = upload(&mut conn, &mut demux, &files, &TransferOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));
    assert_eq!(peer.chunks_sent(), 0);
}
