// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end gateway scenarios over real WebSockets.

mod common;

use common::*;
use mew_audit::AuditLogs;
use mew_config::{GatewayConfig, SpacesConfig};
use mew_core::kinds;
use mew_participant::{Event, Participant, ProposalPhase, SendError};
use serde_json::json;

// ---------------------------------------------------------------------------
// S1 — capability-denied chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn denied_chat_is_rejected_and_audited() {
    let dir = tempfile::tempdir().unwrap();
    let audit = AuditLogs::open(dir.path(), true, true).await.unwrap();
    let (addr, state) = spawn_gateway(
        GatewayConfig::default(),
        SpacesConfig::from_toml_str(
            r#"
            [spaces.demo.participants.A]
            capabilities = [{ kind = "!chat" }]
            [spaces.demo.participants.B]
            capabilities = [{ kind = "chat" }]
            "#,
        )
        .unwrap(),
        audit,
    )
    .await;

    let mut a = connect(addr, "demo", "A").await;
    expect_welcome(&mut a).await;
    let mut b = connect(addr, "demo", "B").await;
    expect_welcome(&mut b).await;

    let chat = a.envelope("chat", json!({"text": "hi"}));
    a.send(&chat).await.unwrap();

    let error = recv_kind(&mut a, kinds::SYSTEM_ERROR).await;
    assert_eq!(error.payload["error"], "operation_failed");
    assert_eq!(error.payload["attempted_kind"], "chat");
    assert!(error.payload["your_capabilities"].is_array());
    assert_eq!(error.correlation_id, vec![chat.id.clone()]);

    assert_silence(&mut b).await;

    // The denial is in the capability-decision log, correlated by envelope ID.
    state.audit.sync().await;
    let decisions =
        std::fs::read_to_string(dir.path().join(mew_audit::CAPABILITY_DECISIONS_FILE)).unwrap();
    let denied = decisions
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .find(|v| v["details"]["result"] == "denied")
        .expect("a denied decision entry");
    assert_eq!(denied["envelope_id"], chat.id.as_str());
    assert_eq!(denied["participant"], "A");

    // The envelope-history log recorded the failure.
    let history =
        std::fs::read_to_string(dir.path().join(mew_audit::ENVELOPE_HISTORY_FILE)).unwrap();
    assert!(history.lines().any(|line| {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        v["event"] == "failed" && v["id"] == chat.id.as_str()
    }));
}

// ---------------------------------------------------------------------------
// S2 — proposal / fulfillment / response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn proposal_fulfillment_response_chain_is_routed_and_recorded() {
    let (addr, _state) = spawn_default(
        r#"
        [spaces.demo.participants.A]
        capabilities = [{ kind = "mcp/proposal" }]
        [spaces.demo.participants.B]
        capabilities = [{ kind = "mcp/request" }, { kind = "mcp/response" }]
        [spaces.demo.participants.B-tool]
        capabilities = [{ kind = "mcp/response" }]
        "#,
    )
    .await;

    let mut a = connect(addr, "demo", "A").await;
    expect_welcome(&mut a).await;
    let mut b = connect(addr, "demo", "B").await;
    expect_welcome(&mut b).await;
    let mut tool = connect(addr, "demo", "B-tool").await;
    expect_welcome(&mut tool).await;

    // A proposes a tool call to B.
    let proposal = a
        .envelope(
            kinds::MCP_PROPOSAL,
            json!({"method": "tools/call", "params": {"name": "add", "arguments": {"a": 1, "b": 2}}}),
        )
        .to(["B"])
        .with_id("p1");
    a.send(&proposal).await.unwrap();

    let seen = recv_kind(&mut b, kinds::MCP_PROPOSAL).await;
    assert_eq!(seen.id, "p1");

    // B fulfills it by issuing the real request, correlated to p1.
    let fulfillment = b
        .envelope(kinds::MCP_REQUEST, seen.payload.clone())
        .to(["B-tool"])
        .correlate(["p1"])
        .with_id("r1");
    b.send(&fulfillment).await.unwrap();

    let request = recv_kind(&mut tool, kinds::MCP_REQUEST).await;
    assert_eq!(request.id, "r1");
    assert_eq!(request.correlation_id, vec!["p1"]);

    // The tool responds to the fulfillment.
    let response = tool
        .envelope(
            kinds::MCP_RESPONSE,
            json!({"result": {"content": [{"type": "text", "text": "3"}]}}),
        )
        .to(["B"])
        .correlate(["r1"])
        .with_id("resp1");
    tool.send(&response).await.unwrap();

    let outcome = recv_kind(&mut b, kinds::MCP_RESPONSE).await;
    assert_eq!(outcome.id, "resp1");
    assert_eq!(outcome.correlation_id, vec!["r1"]);

    // Envelope history shows the chain p1 → r1 → resp1 (newest first).
    let history = http_get_json(addr, "/spaces/demo/history?limit=10").await;
    let ids: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["resp1", "r1", "p1"]);
}

// ---------------------------------------------------------------------------
// S3 — unauthorized withdrawal (SDK invariant)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn withdrawal_from_non_proposer_is_ignored_by_sdk() {
    let (addr, _state) = spawn_default(
        r#"
        [spaces.demo.participants.A]
        capabilities = [{ kind = "mcp/*" }]
        [spaces.demo.participants.B]
        capabilities = [{ kind = "chat" }]
        [spaces.demo.participants.C]
        capabilities = [{ kind = "mcp/withdraw" }]
        "#,
    )
    .await;

    let base = format!("ws://127.0.0.1:{}", addr.port());
    let mut a = Participant::connect(&base, "demo", "A", None, 10_000)
        .await
        .unwrap();
    // Drain A's welcome.
    let _ = a.next().await.unwrap().unwrap();

    let mut b = connect(addr, "demo", "B").await;
    expect_welcome(&mut b).await;
    let mut c = connect(addr, "demo", "C").await;
    expect_welcome(&mut c).await;

    let proposal = mew_core::Envelope::new("A", kinds::MCP_PROPOSAL, json!({"method": "tools/call"}))
        .to(["B"])
        .with_id("p1");
    a.send_envelope(proposal).await.unwrap();
    assert_eq!(a.proposals().get("p1").unwrap().phase, ProposalPhase::Pending);

    // C forges a withdrawal for A's proposal.
    let forged = c.envelope(kinds::MCP_WITHDRAW, json!({})).correlate(["p1"]);
    c.send(&forged).await.unwrap();

    // A observes the forged withdrawal and discards it.
    loop {
        match a.next().await.unwrap().unwrap() {
            Event::Envelope(env) if env.kind == kinds::MCP_WITHDRAW => break,
            _ => continue,
        }
    }
    assert_eq!(
        a.proposals().get("p1").unwrap().phase,
        ProposalPhase::Pending,
        "p1 must remain pending after a non-proposer withdrawal"
    );

    // Only the proposer's own withdrawal succeeds.
    let genuine = mew_core::Envelope::new("A", kinds::MCP_WITHDRAW, json!({})).correlate(["p1"]);
    a.send_envelope(genuine).await.unwrap();
    assert_eq!(
        a.proposals().get("p1").unwrap().phase,
        ProposalPhase::Withdrawn
    );
}

// ---------------------------------------------------------------------------
// S4 — targeted stream delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn targeted_stream_frames_reach_only_the_target() {
    let (addr, _state) = spawn_default(
        r#"
        [spaces.demo.participants.P1]
        capabilities = [{ kind = "stream/*" }]
        [spaces.demo.participants.P2]
        capabilities = [{ kind = "chat" }]
        [spaces.demo.participants.game-server]
        capabilities = [{ kind = "chat" }]
        "#,
    )
    .await;

    let mut p1 = connect(addr, "demo", "P1").await;
    expect_welcome(&mut p1).await;
    let mut p2 = connect(addr, "demo", "P2").await;
    expect_welcome(&mut p2).await;
    let mut server = connect(addr, "demo", "game-server").await;
    expect_welcome(&mut server).await;

    let request = p1.envelope(
        kinds::STREAM_REQUEST,
        json!({"direction": "upload", "target": ["game-server"], "format": "pos/v1"}),
    );
    p1.send(&request).await.unwrap();

    let open = recv_kind(&mut p1, kinds::STREAM_OPEN).await;
    assert_eq!(open.payload["stream_id"], "stream-1");
    assert_eq!(open.payload["target"], json!(["game-server"]));

    // Everyone saw the lifecycle envelopes; drain them off P2 and the target.
    recv_kind(&mut p2, kinds::STREAM_OPEN).await;
    recv_kind(&mut server, kinds::STREAM_OPEN).await;

    p1.send_frame("stream-1", "{\"x\":5}").await.unwrap();

    let frame = recv_frame(&mut server).await;
    assert_eq!(frame.stream_id, "stream-1");
    assert_eq!(frame.data, "{\"x\":5}");

    // P2 is outside the target list and never sees data frames.
    assert_silence(&mut p2).await;

    // A late joiner reconstructs the stream topology from its welcome.
    let mut p4 = connect(addr, "demo", "P4").await;
    let welcome = expect_welcome(&mut p4).await;
    let streams = welcome.payload["active_streams"].as_array().unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0]["stream_id"], "stream-1");
    assert_eq!(streams[0]["target"], json!(["game-server"]));
    assert_eq!(streams[0]["authorized_writers"], json!(["P1"]));
    assert_eq!(streams[0]["format"], "pos/v1");
}

// ---------------------------------------------------------------------------
// S5 — ownership transfer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ownership_transfer_keeps_previous_owner_as_writer() {
    let (addr, _state) = spawn_default(
        r#"
        [spaces.demo.participants.P1]
        capabilities = [{ kind = "stream/*" }]
        [spaces.demo.participants.P2]
        capabilities = [{ kind = "stream/*" }]
        "#,
    )
    .await;

    let mut p1 = connect(addr, "demo", "P1").await;
    expect_welcome(&mut p1).await;
    let mut p2 = connect(addr, "demo", "P2").await;
    expect_welcome(&mut p2).await;

    let request = p1.envelope(kinds::STREAM_REQUEST, json!({"direction": "upload"}));
    p1.send(&request).await.unwrap();
    recv_kind(&mut p1, kinds::STREAM_OPEN).await;

    let transfer = p1.envelope(
        kinds::STREAM_TRANSFER_OWNERSHIP,
        json!({"stream_id": "stream-1", "new_owner": "P2"}),
    );
    p1.send(&transfer).await.unwrap();

    let transferred = recv_kind(&mut p2, kinds::STREAM_OWNERSHIP_TRANSFERRED).await;
    assert_eq!(transferred.payload["previous_owner"], "P1");
    assert_eq!(transferred.payload["new_owner"], "P2");
    assert_eq!(
        transferred.payload["authorized_writers"],
        json!(["P1", "P2"])
    );

    // A subsequent grant from the previous owner is refused.
    let grant = p1.envelope(
        kinds::STREAM_GRANT_WRITE,
        json!({"stream_id": "stream-1", "participant_id": "P1"}),
    );
    p1.send(&grant).await.unwrap();
    let error = recv_kind(&mut p1, kinds::SYSTEM_ERROR).await;
    assert_eq!(error.payload["error"], "unauthorized");
}

// ---------------------------------------------------------------------------
// S6 — participant pause
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pause_blocks_sdk_sends_until_resume() {
    let (addr, _state) = spawn_default(
        r#"
        [spaces.demo.participants.A]
        capabilities = [{ kind = "chat" }, { kind = "participant/status" }]
        [spaces.demo.participants.B]
        capabilities = [{ kind = "participant/*" }, { kind = "chat" }]
        "#,
    )
    .await;

    let base = format!("ws://127.0.0.1:{}", addr.port());
    let mut a = Participant::connect(&base, "demo", "A", None, 10_000)
        .await
        .unwrap();
    let _ = a.next().await.unwrap().unwrap();

    let mut b = connect(addr, "demo", "B").await;
    expect_welcome(&mut b).await;

    // B pauses A.
    let pause = b
        .envelope(kinds::PARTICIPANT_PAUSE, json!({"timeout_seconds": 60}))
        .to(["A"]);
    b.send(&pause).await.unwrap();

    // A processes the control and broadcasts its paused status.
    loop {
        match a.next().await.unwrap().unwrap() {
            Event::Envelope(env) if env.kind == kinds::PARTICIPANT_PAUSE => break,
            _ => continue,
        }
    }
    let paused = recv_kind(&mut b, kinds::PARTICIPANT_STATUS).await;
    assert_eq!(paused.payload["status"], "paused");

    // While paused, A's SDK refuses to initiate chat.
    match a.send("chat", json!({"text": "blocked"})).await {
        Err(SendError::Paused { kind }) => assert_eq!(kind, "chat"),
        other => panic!("expected Paused error, got {other:?}"),
    }

    // Resume restores the prior send behavior.
    let resume = b.envelope(kinds::PARTICIPANT_RESUME, json!({})).to(["A"]);
    b.send(&resume).await.unwrap();
    loop {
        match a.next().await.unwrap().unwrap() {
            Event::Envelope(env) if env.kind == kinds::PARTICIPANT_RESUME => break,
            _ => continue,
        }
    }
    let active = recv_kind(&mut b, kinds::PARTICIPANT_STATUS).await;
    assert_eq!(active.payload["status"], "active");

    a.send("chat", json!({"text": "back"})).await.unwrap();
    let chat = recv_kind(&mut b, "chat").await;
    assert_eq!(chat.payload["text"], "back");
}
