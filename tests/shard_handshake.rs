//! End-to-end exercises of the shard protocol state machine against an
//! in-process mock gateway: a bare `TcpListener` upgraded with
//! `tokio-tungstenite`'s server handshake, speaking the same envelope the
//! shard itself decodes.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use wayfare_gateway::{Shard, ShardConfig, ShardEvent};

type MockSocket = WebSocketStream<TcpStream>;

async fn send_payload(ws: &mut MockSocket, op: u8, d: serde_json::Value) {
    let body = json!({ "op": op, "d": d }).to_string();
    ws.send(Message::Binary(body.into_bytes())).await.unwrap();
}

async fn send_dispatch(ws: &mut MockSocket, t: &str, s: u64, d: serde_json::Value) {
    let body = json!({ "op": 0, "t": t, "s": s, "d": d }).to_string();
    ws.send(Message::Binary(body.into_bytes())).await.unwrap();
}

/// Read inbound frames until one decodes to the given opcode, returning its
/// `d` field. Frames for other opcodes (e.g. a heartbeat sent before the
/// frame under test) are discarded.
async fn recv_op(ws: &mut MockSocket, op: u8) -> serde_json::Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(bytes))) => {
                let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                if value["op"].as_u64() == Some(op as u64) {
                    return value["d"].clone();
                }
            }
            Some(Ok(_)) => continue,
            other => panic!("socket ended unexpectedly while awaiting opcode {op}: {other:?}"),
        }
    }
}

fn shard_config() -> ShardConfig {
    ShardConfig::builder("test-token")
        .shard(0, 1)
        .compression(false)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn full_handshake_reaches_ready_and_then_full_ready() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        send_payload(&mut ws, 10, json!({ "heartbeat_interval": 45_000 })).await;
        recv_op(&mut ws, 2).await; // Identify

        send_dispatch(
            &mut ws,
            "READY",
            1,
            json!({ "session_id": "abc123", "guilds": [{ "id": "1" }] }),
        )
        .await;

        send_dispatch(&mut ws, "GUILD_CREATE", 2, json!({ "id": "1" })).await;

        // keep the socket open long enough for the shard to process both
        // dispatches before the test tears down.
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    let mut shard = Shard::new(shard_config());
    shard.connect(&format!("ws://{addr}")).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = async { shard.run(&tx).await };

    tokio::pin!(server);
    tokio::pin!(client);

    let mut saw_ready = false;
    let mut saw_full_ready = false;
    let mut server_done = false;

    loop {
        tokio::select! {
            _ = &mut server, if !server_done => { server_done = true; }
            _ = &mut client => break,
            Some(event) = rx.recv() => {
                match event {
                    ShardEvent::Ready { session_id, .. } => {
                        assert_eq!(session_id, "abc123");
                        saw_ready = true;
                    }
                    ShardEvent::FullReady { .. } => {
                        saw_full_ready = true;
                    }
                    _ => {}
                }

                if saw_ready && saw_full_ready {
                    break;
                }
            }
        }
    }

    assert!(saw_ready, "expected a Ready event");
    assert!(saw_full_ready, "expected a FullReady event once the one awaited guild arrived");
}

#[tokio::test(start_paused = true)]
async fn heartbeat_ack_is_recorded_and_close_ends_the_run_loop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        send_payload(&mut ws, 10, json!({ "heartbeat_interval": 30 })).await;
        recv_op(&mut ws, 2).await; // Identify

        recv_op(&mut ws, 1).await; // the periodic Heartbeat
        send_payload(&mut ws, 11, serde_json::Value::Null).await; // HeartbeatAck

        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(4000),
            reason: std::borrow::Cow::Borrowed(""),
        })))
        .await
        .unwrap();
    };

    let mut shard = Shard::new(shard_config());
    shard.connect(&format!("ws://{addr}")).await.unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    let (_, outcome) = tokio::join!(server, shard.run(&tx));

    assert_eq!(outcome.code, Some(4000));
    assert!(shard.latency().is_some(), "a heartbeat ack should have recorded a latency sample");
}

#[tokio::test(start_paused = true)]
async fn recoverable_close_preserves_the_session_for_a_resume() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}");

    let mut shard = Shard::new(shard_config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let first_connection = async {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        send_payload(&mut ws, 10, json!({ "heartbeat_interval": 45_000 })).await;
        recv_op(&mut ws, 2).await; // Identify

        send_dispatch(&mut ws, "READY", 1, json!({ "session_id": "abc123", "guilds": [] })).await;

        tokio::time::sleep(Duration::from_millis(10)).await;

        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(4000),
            reason: std::borrow::Cow::Borrowed(""),
        })))
        .await
        .unwrap();
    };

    shard.connect(&url).await.unwrap();
    let (_, first_outcome) = tokio::join!(first_connection, shard.run(&tx));

    assert!(first_outcome.resumable, "a session_id and a recoverable code should allow a resume");

    while rx.try_recv().is_ok() {}

    let second_connection = async {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        send_payload(&mut ws, 10, json!({ "heartbeat_interval": 45_000 })).await;

        let resume_body = recv_op(&mut ws, 6).await; // Resume, not Identify
        assert_eq!(resume_body["session_id"], "abc123");

        send_dispatch(&mut ws, "RESUMED", 2, json!({})).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    shard.connect(&url).await.unwrap();

    tokio::select! {
        _ = second_connection => {}
        _ = shard.run(&tx) => {}
    }

    let mut saw_resumed = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ShardEvent::Resumed) {
            saw_resumed = true;
        }
    }

    assert!(saw_resumed, "expected a Resumed event after the resume handshake");
}
