// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared harness for the end-to-end gateway suites.
#![allow(dead_code)]

use mew_audit::AuditLogs;
use mew_config::{GatewayConfig, SpacesConfig};
use mew_core::{Envelope, kinds};
use mew_gateway::{AppState, build_app};
use mew_participant::{Client, ClientEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// How long to wait for a message that should arrive.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for a message that should NOT arrive.
pub const SILENCE_TIMEOUT: Duration = Duration::from_millis(300);

/// Spawn a gateway on a random port.
pub async fn spawn_gateway(
    config: GatewayConfig,
    spaces: SpacesConfig,
    audit: AuditLogs,
) -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(AppState::new(config, spaces, audit));
    let app = build_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// Spawn a gateway with default config and the given space tables.
pub async fn spawn_default(spaces_toml: &str) -> (SocketAddr, Arc<AppState>) {
    spawn_gateway(
        GatewayConfig::default(),
        SpacesConfig::from_toml_str(spaces_toml).unwrap(),
        AuditLogs::disabled(),
    )
    .await
}

/// Connect a client to `space` as `participant`.
pub async fn connect(addr: SocketAddr, space: &str, participant: &str) -> Client {
    Client::connect(
        &format!("ws://127.0.0.1:{}", addr.port()),
        space,
        participant,
        None,
    )
    .await
    .unwrap()
}

/// Receive the next envelope, failing on frames, closure, or timeout.
pub async fn recv_envelope(client: &mut Client) -> Envelope {
    match tokio::time::timeout(RECV_TIMEOUT, client.recv())
        .await
        .expect("timed out waiting for envelope")
        .expect("transport error")
    {
        Some(ClientEvent::Envelope(envelope)) => *envelope,
        other => panic!("expected envelope, got {other:?}"),
    }
}

/// Receive envelopes until one of `kind` arrives, failing on timeout.
pub async fn recv_kind(client: &mut Client, kind: &str) -> Envelope {
    loop {
        let envelope = recv_envelope(client).await;
        if envelope.kind == kind {
            return envelope;
        }
    }
}

/// Receive the next raw stream frame, skipping envelopes.
pub async fn recv_frame(client: &mut Client) -> mew_protocol::StreamFrame {
    loop {
        match tokio::time::timeout(RECV_TIMEOUT, client.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("transport error")
        {
            Some(ClientEvent::Frame(frame)) => return frame,
            Some(ClientEvent::Envelope(_)) => continue,
            None => panic!("connection closed while waiting for frame"),
        }
    }
}

/// Assert that nothing arrives within [`SILENCE_TIMEOUT`].
pub async fn assert_silence(client: &mut Client) {
    if let Ok(event) = tokio::time::timeout(SILENCE_TIMEOUT, client.recv()).await {
        panic!("expected silence, got {event:?}");
    }
}

/// Consume the directed `system/welcome` that opens every session.
pub async fn expect_welcome(client: &mut Client) -> Envelope {
    let envelope = recv_envelope(client).await;
    assert_eq!(envelope.kind, kinds::SYSTEM_WELCOME, "first message must be the welcome");
    envelope
}

/// Issue a raw HTTP GET against the gateway and parse the JSON body.
pub async fn http_get_json(addr: SocketAddr, path: &str) -> serde_json::Value {
    let mut tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request =
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    tcp.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    tcp.read_to_end(&mut raw).await.unwrap();
    let response = String::from_utf8_lossy(&raw);
    assert!(
        response.contains("200 OK"),
        "expected 200 OK for {path}, got: {response}"
    );
    let body = response
        .split("\r\n\r\n")
        .nth(1)
        .expect("response has a body");
    serde_json::from_str(body.trim()).expect("JSON body")
}
