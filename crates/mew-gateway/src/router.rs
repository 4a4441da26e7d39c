// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-space envelope pipeline: validate, authorize, record, fan out.
//!
//! All processing for a space happens under its single-writer lock, so
//! envelopes are totally ordered within a space. Fan-out only enqueues to
//! per-participant channels; a slow consumer overflows its bounded queue
//! and is disconnected rather than stalling the space.

use crate::AppState;
use crate::error::{GatewayError, validation_error_envelope};
use crate::space::{EnqueueOutcome, Space};
use crate::streams;
use mew_audit::{
    AuditLogs, CapabilityDecisionEntry, DecisionDetails, DecisionResult, DecisionSource,
    EnvelopeHistoryEntry,
};
use mew_capability::Decision;
use mew_core::system::{Presence, PresenceEvent, Register, SystemError};
use mew_core::{Capability, ContextField, ContextOp, Envelope, kinds};
use mew_protocol::{Inbound, check_size, decode_text, validate_inbound};
use serde_json::Value;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// What the connection task should do after one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep reading.
    Continue,
    /// Close the connection with the given code.
    Close {
        /// WebSocket close code.
        code: u16,
    },
}

/// Process one inbound WebSocket text frame from `sender_id`.
pub async fn handle_text(
    state: &AppState,
    space: &Mutex<Space>,
    sender_id: &str,
    connection_id: &str,
    text: &str,
) -> Disposition {
    if let Err(err) = check_size(text.len(), state.config.max_message_size_bytes) {
        let guard = space.lock().await;
        let envelope = validation_error_envelope(&err, sender_id, None);
        send_directly(&guard, sender_id, &envelope);
        return Disposition::Continue;
    }

    match decode_text(text) {
        Ok(Inbound::Frame(frame)) => {
            let mut guard = space.lock().await;
            let overflowed = streams::route_frame(&guard, sender_id, &frame, text);
            disconnect_overflowed(&mut guard, &state.audit, overflowed);
            Disposition::Continue
        }
        Ok(Inbound::Envelope(envelope)) => {
            handle_envelope(state, space, sender_id, connection_id, *envelope).await
        }
        Err(err) => {
            let guard = space.lock().await;
            let payload = SystemError::new("parse_error").with_message(err.to_string());
            let envelope = Envelope::system(
                kinds::SYSTEM_ERROR,
                serde_json::to_value(payload).unwrap_or(Value::Null),
            )
            .to([sender_id]);
            send_directly(&guard, sender_id, &envelope);
            Disposition::Continue
        }
    }
}

async fn handle_envelope(
    state: &AppState,
    space: &Mutex<Space>,
    sender_id: &str,
    connection_id: &str,
    envelope: Envelope,
) -> Disposition {
    let started = Instant::now();
    let mut guard = space.lock().await;

    if !guard.participants.contains_key(sender_id) {
        // The sender was evicted while this frame was in flight.
        return Disposition::Continue;
    }

    // -- validation ---------------------------------------------------------
    if let Err(err) = validate_inbound(&envelope, sender_id, |id| guard.history.contains(id)) {
        state.audit.record_history(
            &EnvelopeHistoryEntry::failed(&envelope, err.code()).for_recipient(sender_id),
        );
        let error_envelope = validation_error_envelope(&err, sender_id, Some(&envelope.id));
        send_directly(&guard, sender_id, &error_envelope);
        if err.is_fatal() {
            return Disposition::Close { code: 1008 };
        }
        return Disposition::Continue;
    }

    // -- capability check ---------------------------------------------------
    let bypass = envelope.is_system() || envelope.kind == kinds::SYSTEM_HEARTBEAT;
    if !bypass {
        let sender = &guard.participants[sender_id];
        let decision = sender.capabilities.decision(&envelope);
        let grants = sender.capabilities.grants();
        record_check(&state.audit, &envelope, sender_id, &grants, &decision);

        if !decision.is_allowed() {
            let err = GatewayError::OperationFailed {
                kind: envelope.kind.clone(),
                capabilities: grants,
                reason: decision.denial_reason().unwrap_or_default(),
            };
            state
                .audit
                .record_history(&EnvelopeHistoryEntry::failed(&envelope, err.code()));
            let error_envelope = err.to_envelope(sender_id, Some(&envelope.id));
            send_directly(&guard, sender_id, &error_envelope);
            return Disposition::Continue;
        }
    }

    // -- accept -------------------------------------------------------------
    state
        .audit
        .record_history(&EnvelopeHistoryEntry::received(&envelope, connection_id));
    guard.history.push(envelope.clone());
    apply_context(&mut guard, sender_id, &envelope);

    // system/register mutates the sender's grants instead of fanning out.
    if envelope.kind == kinds::SYSTEM_REGISTER {
        handle_register(&mut guard, &state.audit, sender_id, &envelope);
        return Disposition::Continue;
    }

    // -- fan out ------------------------------------------------------------
    let text = mew_protocol::encode(&envelope);
    let mut overflowed = Vec::new();
    if envelope.is_broadcast() {
        for (id, participant) in &guard.participants {
            if id == sender_id {
                continue;
            }
            match participant.enqueue(text.clone()) {
                EnqueueOutcome::Delivered => {
                    record_delivered(&state.audit, &envelope, id, started);
                }
                EnqueueOutcome::Overflow => overflowed.push(id.clone()),
                EnqueueOutcome::Disconnected => {
                    record_missed(&state.audit, &envelope, id);
                }
            }
        }
    } else {
        for recipient in &envelope.to {
            match guard.participants.get(recipient) {
                Some(participant) => match participant.enqueue(text.clone()) {
                    EnqueueOutcome::Delivered => {
                        record_delivered(&state.audit, &envelope, recipient, started);
                    }
                    EnqueueOutcome::Overflow => overflowed.push(recipient.clone()),
                    EnqueueOutcome::Disconnected => {
                        record_missed(&state.audit, &envelope, recipient);
                    }
                },
                None => {
                    debug!(
                        space = %guard.name,
                        recipient = %recipient,
                        "recipient absent; envelope skipped"
                    );
                    record_missed(&state.audit, &envelope, recipient);
                }
            }
        }
    }
    disconnect_overflowed(&mut guard, &state.audit, overflowed);

    // -- gateway interpretation of stream control ---------------------------
    if kinds::is_stream_control(&envelope.kind)
        && let Err(err) = streams::handle_control(&mut guard, &state.audit, sender_id, &envelope)
    {
        let error_envelope = err.to_envelope(sender_id, Some(&envelope.id));
        send_directly(&guard, sender_id, &error_envelope);
    }

    Disposition::Continue
}

// ---------------------------------------------------------------------------
// Pipeline pieces
// ---------------------------------------------------------------------------

fn send_directly(space: &Space, recipient: &str, envelope: &Envelope) {
    if let Some(participant) = space.participants.get(recipient) {
        let _ = participant.enqueue(mew_protocol::encode(envelope));
    }
}

fn record_check(
    audit: &AuditLogs,
    envelope: &Envelope,
    sender_id: &str,
    grants: &[Capability],
    decision: &Decision,
) {
    audit.record_decision(&CapabilityDecisionEntry::check(
        envelope.id.clone(),
        sender_id,
        DecisionDetails {
            required_capability: envelope.kind.clone(),
            granted_capabilities: grants.to_vec(),
            result: if decision.is_allowed() {
                DecisionResult::Allowed
            } else {
                DecisionResult::Denied
            },
            source: DecisionSource::SpaceConfig,
            reason: decision.denial_reason(),
        },
    ));
}

fn record_delivered(audit: &AuditLogs, envelope: &Envelope, recipient: &str, started: Instant) {
    audit.record_history(&EnvelopeHistoryEntry::delivered(
        envelope,
        recipient,
        started.elapsed().as_millis() as u64,
    ));
}

fn record_missed(audit: &AuditLogs, envelope: &Envelope, recipient: &str) {
    audit.record_history(
        &EnvelopeHistoryEntry::failed(envelope, "no_connection").for_recipient(recipient),
    );
}

/// Apply the envelope's context operation to the sender's stack.
fn apply_context(space: &mut Space, sender_id: &str, envelope: &Envelope) {
    let Some(ContextField::Operation(op)) = &envelope.context else {
        return;
    };
    let Some(sender) = space.participants.get_mut(sender_id) else {
        return;
    };
    let subject = op
        .correlation_id
        .clone()
        .or_else(|| envelope.correlation_id.first().cloned())
        .unwrap_or_else(|| envelope.id.clone());
    match op.operation {
        ContextOp::Push => sender.push_context(subject),
        ContextOp::Pop => {
            sender.pop_context();
        }
        ContextOp::Resume => sender.resume_context(&subject),
    }
}

/// Merge `system/register` capabilities into the sender's set and broadcast
/// a presence update.
fn handle_register(space: &mut Space, audit: &AuditLogs, sender_id: &str, envelope: &Envelope) {
    let register: Register = match serde_json::from_value(envelope.payload.clone()) {
        Ok(register) => register,
        Err(err) => {
            let gateway_err = GatewayError::MalformedPayload {
                kind: envelope.kind.clone(),
                detail: err.to_string(),
            };
            let error_envelope = gateway_err.to_envelope(sender_id, Some(&envelope.id));
            send_directly(space, sender_id, &error_envelope);
            return;
        }
    };

    let Some(sender) = space.participants.get_mut(sender_id) else {
        return;
    };
    sender.capabilities.merge(&register.capabilities);
    // These two are always present post-merge so a registered participant
    // can keep registering and answer requests.
    sender.capabilities.merge(&[
        Capability::kind(kinds::SYSTEM_REGISTER),
        Capability::kind(kinds::MCP_RESPONSE),
    ]);
    let info = sender.info();

    audit.record_decision(&CapabilityDecisionEntry::grant(
        envelope.id.clone(),
        sender_id,
        register.capabilities,
    ));

    let update = Envelope::system(
        kinds::SYSTEM_PRESENCE,
        serde_json::to_value(Presence {
            event: PresenceEvent::Update,
            participant: info,
        })
        .unwrap_or(Value::Null),
    );
    streams::broadcast(space, &update, Some(sender_id));
}

// ---------------------------------------------------------------------------
// Disconnects
// ---------------------------------------------------------------------------

/// Remove a participant, run the stream disconnect policy, and broadcast
/// the leave. Returns `false` when the participant was not present.
pub fn force_disconnect(
    space: &mut Space,
    audit: &AuditLogs,
    participant_id: &str,
    close: Option<(u16, &str)>,
) -> bool {
    let Some(entry) = space.participants.remove(participant_id) else {
        return false;
    };
    if let Some((code, reason)) = close {
        entry.request_close(code, reason);
    }

    for closed in streams::cleanup_for_disconnect(space, audit, participant_id) {
        streams::broadcast(space, &closed, None);
    }

    let leave = Envelope::system(
        kinds::SYSTEM_PRESENCE,
        serde_json::to_value(Presence {
            event: PresenceEvent::Leave,
            participant: entry.info(),
        })
        .unwrap_or(Value::Null),
    );
    streams::broadcast(space, &leave, None);
    true
}

fn disconnect_overflowed(space: &mut Space, audit: &AuditLogs, overflowed: Vec<String>) {
    for id in overflowed {
        warn!(participant = %id, "outbound queue overflow; disconnecting slow consumer");
        force_disconnect(space, audit, &id, Some((1011, "outbound queue overflow")));
    }
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{Outbound, ParticipantEntry};
    use mew_capability::CapabilitySet;
    use mew_config::{GatewayConfig, SpacesConfig};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_state() -> AppState {
        AppState::new(
            GatewayConfig::default(),
            SpacesConfig::default(),
            AuditLogs::disabled(),
        )
    }

    async fn space_with(
        state: &AppState,
        participants: &[(&str, &[&str])],
    ) -> (
        Arc<Mutex<Space>>,
        Vec<mpsc::Receiver<Outbound>>,
    ) {
        let space = state.registry.get_or_create("demo").await.unwrap();
        let mut receivers = Vec::new();
        {
            let mut guard = space.lock().await;
            for (id, caps) in participants {
                let (tx, rx) = mpsc::channel(32);
                let grants: Vec<Capability> =
                    caps.iter().map(|k| Capability::kind(*k)).collect();
                guard.participants.insert(
                    (*id).to_string(),
                    ParticipantEntry {
                        id: (*id).to_string(),
                        connection_id: format!("conn-{id}"),
                        capabilities: CapabilitySet::compile(&grants),
                        sender: tx,
                        context_stack: Vec::new(),
                        joined_at: chrono::Utc::now(),
                    },
                );
                receivers.push(rx);
            }
        }
        (space, receivers)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(Outbound::Text(text)) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    async fn send(
        state: &AppState,
        space: &Mutex<Space>,
        sender: &str,
        envelope: &Envelope,
    ) -> Disposition {
        handle_text(
            state,
            space,
            sender,
            &format!("conn-{sender}"),
            &mew_protocol::encode(envelope),
        )
        .await
    }

    // ---- capability denial (scenario: denied chat) -------------------------

    #[tokio::test]
    async fn denied_chat_errors_sender_and_skips_peers() {
        let state = test_state();
        let (space, mut rx) = space_with(&state, &[("A", &["!chat"]), ("B", &["chat"])]).await;

        let chat = Envelope::new("A", "chat", json!({"text": "hi"}));
        let disposition = send(&state, &space, "A", &chat).await;
        assert_eq!(disposition, Disposition::Continue);

        let a_msgs = drain(&mut rx[0]);
        assert_eq!(a_msgs.len(), 1);
        assert_eq!(a_msgs[0].kind, kinds::SYSTEM_ERROR);
        assert_eq!(a_msgs[0].payload["error"], "operation_failed");
        assert_eq!(a_msgs[0].payload["attempted_kind"], "chat");
        assert!(a_msgs[0].payload["your_capabilities"].is_array());

        assert!(drain(&mut rx[1]).is_empty());
        assert!(space.lock().await.history.is_empty());
    }

    // ---- broadcast and targeted delivery -----------------------------------

    #[tokio::test]
    async fn broadcast_reaches_all_but_sender() {
        let state = test_state();
        let (space, mut rx) =
            space_with(&state, &[("A", &["chat"]), ("B", &[]), ("C", &[])]).await;

        let chat = Envelope::new("A", "chat", json!({"text": "hi"}));
        send(&state, &space, "A", &chat).await;

        assert!(drain(&mut rx[0]).is_empty());
        assert_eq!(drain(&mut rx[1]).len(), 1);
        assert_eq!(drain(&mut rx[2]).len(), 1);
        assert_eq!(space.lock().await.history.len(), 1);
    }

    #[tokio::test]
    async fn targeted_delivery_skips_absent_ids() {
        let state = test_state();
        let (space, mut rx) =
            space_with(&state, &[("A", &["mcp/*"]), ("B", &[]), ("C", &[])]).await;

        let req = Envelope::new("A", "mcp/request", json!({"method": "tools/list"}))
            .to(["B", "ghost"]);
        send(&state, &space, "A", &req).await;

        assert_eq!(drain(&mut rx[1]).len(), 1);
        assert!(drain(&mut rx[2]).is_empty());
        // Accepted despite the missing recipient.
        assert_eq!(space.lock().await.history.len(), 1);
    }

    #[tokio::test]
    async fn ordering_is_preserved_per_recipient() {
        let state = test_state();
        let (space, mut rx) = space_with(&state, &[("A", &["chat"]), ("B", &[])]).await;

        for i in 0..10 {
            let chat = Envelope::new("A", "chat", json!({"n": i}));
            send(&state, &space, "A", &chat).await;
        }
        let received = drain(&mut rx[1]);
        let ns: Vec<i64> = received
            .iter()
            .map(|e| e.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, (0..10).collect::<Vec<i64>>());
    }

    // ---- validation --------------------------------------------------------

    #[tokio::test]
    async fn spoofed_from_closes_connection() {
        let state = test_state();
        let (space, mut rx) = space_with(&state, &[("A", &["chat"]), ("B", &[])]).await;

        let spoofed = Envelope::new("B", "chat", json!({"text": "hi"}));
        let disposition = send(&state, &space, "A", &spoofed).await;
        assert_eq!(disposition, Disposition::Close { code: 1008 });

        let a_msgs = drain(&mut rx[0]);
        assert_eq!(a_msgs[0].payload["error"], "unauthorized_from");
        assert!(drain(&mut rx[1]).is_empty());
    }

    #[tokio::test]
    async fn protocol_mismatch_closes_connection() {
        let state = test_state();
        let (space, mut rx) = space_with(&state, &[("A", &["chat"])]).await;

        let mut env = Envelope::new("A", "chat", json!({}));
        env.protocol = "mew/v0.1".into();
        let disposition = send(&state, &space, "A", &env).await;
        assert_eq!(disposition, Disposition::Close { code: 1008 });
        assert_eq!(drain(&mut rx[0])[0].payload["error"], "protocol_mismatch");
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_without_fanout() {
        let state = test_state();
        let (space, mut rx) = space_with(&state, &[("A", &["chat"]), ("B", &[])]).await;

        let env = Envelope::new("A", "chat", json!({})).with_id("dup-1");
        send(&state, &space, "A", &env).await;
        assert_eq!(drain(&mut rx[1]).len(), 1);

        let disposition = send(&state, &space, "A", &env).await;
        assert_eq!(disposition, Disposition::Continue);
        assert_eq!(drain(&mut rx[0])[0].payload["error"], "parse_error");
        assert!(drain(&mut rx[1]).is_empty());
        assert_eq!(space.lock().await.history.len(), 1);
    }

    #[tokio::test]
    async fn non_json_text_is_parse_error() {
        let state = test_state();
        let (space, mut rx) = space_with(&state, &[("A", &["chat"])]).await;

        let disposition = handle_text(&state, &space, "A", "conn-A", "not json").await;
        assert_eq!(disposition, Disposition::Continue);
        assert_eq!(drain(&mut rx[0])[0].payload["error"], "parse_error");
    }

    #[tokio::test]
    async fn oversize_message_is_rejected_but_kept_open() {
        let mut config = GatewayConfig::default();
        config.max_message_size_bytes = 64;
        let state = AppState::new(config, SpacesConfig::default(), AuditLogs::disabled());
        let (space, mut rx) = space_with(&state, &[("A", &["chat"])]).await;

        let big = "x".repeat(256);
        let disposition = handle_text(&state, &space, "A", "conn-A", &big).await;
        assert_eq!(disposition, Disposition::Continue);
        assert_eq!(drain(&mut rx[0])[0].payload["error"], "message_too_large");
    }

    // ---- history bound -----------------------------------------------------

    #[tokio::test]
    async fn history_is_bounded_fifo() {
        let mut config = GatewayConfig::default();
        config.max_history_size = 5;
        let state = AppState::new(config, SpacesConfig::default(), AuditLogs::disabled());
        let (space, _rx) = space_with(&state, &[("A", &["chat"])]).await;

        for i in 0..8 {
            let env = Envelope::new("A", "chat", json!({})).with_id(format!("e{i}"));
            send(&state, &space, "A", &env).await;
        }
        let guard = space.lock().await;
        assert_eq!(guard.history.len(), 5);
        let newest: Vec<String> = guard
            .history
            .page(None, 5)
            .iter()
            .map(|e| e.id.clone())
            .collect();
        assert_eq!(newest, ["e7", "e6", "e5", "e4", "e3"]);
    }

    // ---- context stack -----------------------------------------------------

    #[tokio::test]
    async fn context_operations_mutate_sender_stack() {
        let state = test_state();
        let (space, _rx) = space_with(&state, &[("A", &["chat"]), ("B", &[])]).await;

        let push = Envelope::new("A", "chat", json!({}))
            .with_context(ContextField::push("topic-1"));
        send(&state, &space, "A", &push).await;
        assert_eq!(
            space.lock().await.participants["A"].context_stack,
            vec!["topic-1"]
        );

        let pop = Envelope::new("A", "chat", json!({})).with_context(ContextField::pop());
        send(&state, &space, "A", &pop).await;
        assert!(space.lock().await.participants["A"].context_stack.is_empty());
    }

    // ---- system/register ---------------------------------------------------

    #[tokio::test]
    async fn register_merges_and_broadcasts_update() {
        let state = test_state();
        let (space, mut rx) =
            space_with(&state, &[("A", &["system/register"]), ("B", &[])]).await;

        let register = Envelope::new(
            "A",
            kinds::SYSTEM_REGISTER,
            json!({"capabilities": [{"kind": "mcp/proposal"}]}),
        );
        send(&state, &space, "A", &register).await;

        {
            let guard = space.lock().await;
            let grants = guard.participants["A"].capabilities.grants();
            let kinds_held: Vec<&str> = grants.iter().map(|c| c.kind.as_str()).collect();
            assert!(kinds_held.contains(&"mcp/proposal"));
            assert!(kinds_held.contains(&"system/register"));
            assert!(kinds_held.contains(&"mcp/response"));
        }

        // The register envelope itself is not forwarded; peers observe the
        // presence update.
        let b_msgs = drain(&mut rx[1]);
        assert_eq!(b_msgs.len(), 1);
        assert_eq!(b_msgs[0].kind, kinds::SYSTEM_PRESENCE);
        assert_eq!(b_msgs[0].payload["event"], "update");
        assert_eq!(b_msgs[0].payload["participant"]["id"], "A");
    }

    // ---- slow consumer -----------------------------------------------------

    #[tokio::test]
    async fn slow_consumer_is_disconnected() {
        let state = test_state();
        let space = state.registry.get_or_create("demo").await.unwrap();
        let (tx_a, _rx_a) = mpsc::channel(32);
        // B gets a queue of depth 1 and never drains it.
        let (tx_b, mut rx_b) = mpsc::channel(1);
        {
            let mut guard = space.lock().await;
            for (id, tx) in [("A", tx_a), ("B", tx_b.clone())] {
                guard.participants.insert(
                    id.to_string(),
                    ParticipantEntry {
                        id: id.to_string(),
                        connection_id: format!("conn-{id}"),
                        capabilities: CapabilitySet::compile(&[Capability::kind("chat")]),
                        sender: tx,
                        context_stack: Vec::new(),
                        joined_at: chrono::Utc::now(),
                    },
                );
            }
        }
        drop(tx_b);

        send(&state, &space, "A", &Envelope::new("A", "chat", json!({"n": 1}))).await;
        send(&state, &space, "A", &Envelope::new("A", "chat", json!({"n": 2}))).await;

        let guard = space.lock().await;
        assert!(!guard.participants.contains_key("B"));
        drop(guard);

        // B's queue holds the first chat; removal dropped the sender, so the
        // channel closes once drained and the writer task shuts the socket.
        assert!(matches!(rx_b.try_recv(), Ok(Outbound::Text(_))));
        assert!(rx_b.try_recv().is_err());
    }

    // ---- force disconnect --------------------------------------------------

    #[tokio::test]
    async fn force_disconnect_broadcasts_leave_and_cleans_streams() {
        let state = test_state();
        let (space, mut rx) =
            space_with(&state, &[("A", &["stream/*"]), ("B", &[])]).await;

        let open = Envelope::new("A", kinds::STREAM_REQUEST, json!({"direction": "upload"}));
        send(&state, &space, "A", &open).await;
        drain(&mut rx[1]);

        {
            let mut guard = space.lock().await;
            assert!(force_disconnect(&mut guard, &state.audit, "A", None));
            assert!(guard.streams.is_empty());
        }

        let b_msgs = drain(&mut rx[1]);
        let kinds_seen: Vec<&str> = b_msgs.iter().map(|e| e.kind.as_str()).collect();
        assert!(kinds_seen.contains(&kinds::STREAM_CLOSE));
        let leave = b_msgs
            .iter()
            .find(|e| e.kind == kinds::SYSTEM_PRESENCE)
            .unwrap();
        assert_eq!(leave.payload["event"], "leave");
        assert_eq!(leave.payload["participant"]["id"], "A");
    }
}
