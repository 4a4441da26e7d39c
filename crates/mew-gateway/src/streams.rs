// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stream lifecycle: open, authorize, transfer, close, and frame routing.
//!
//! Stream control envelopes are routed like any other message and then
//! interpreted here for stream-state mutation. Data frames never enter the
//! envelope pipeline; [`route_frame`] delivers the raw bytes unchanged.

use crate::error::GatewayError;
use crate::space::{EnqueueOutcome, Space, StreamEntry};
use mew_audit::{
    AuditLogs, CapabilityDecisionEntry, DecisionDetails, DecisionEvent, DecisionResult,
    DecisionSource,
};
use mew_core::stream::{
    OwnershipTransferred, StreamClose, StreamOpen, StreamRequest, TransferOwnership,
    WriteAuthorization, WriteGranted,
};
use mew_core::{Envelope, kinds};
use mew_protocol::StreamFrame;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Enqueue an envelope to every connected participant except `except`.
/// Returns the IDs whose outbound queue overflowed.
pub fn broadcast(space: &Space, envelope: &Envelope, except: Option<&str>) -> Vec<String> {
    let text = mew_protocol::encode(envelope);
    let mut overflowed = Vec::new();
    for (id, participant) in &space.participants {
        if Some(id.as_str()) == except {
            continue;
        }
        if participant.enqueue(text.clone()) == EnqueueOutcome::Overflow {
            overflowed.push(id.clone());
        }
    }
    overflowed
}

/// Interpret a stream control envelope. The envelope has already passed
/// capability checks and been fanned out; errors here go back to the sender
/// as `system/error`.
pub fn handle_control(
    space: &mut Space,
    audit: &AuditLogs,
    sender_id: &str,
    envelope: &Envelope,
) -> Result<(), GatewayError> {
    match envelope.kind.as_str() {
        kinds::STREAM_REQUEST => open_stream(space, sender_id, envelope),
        kinds::STREAM_GRANT_WRITE => grant_write(space, audit, sender_id, envelope),
        kinds::STREAM_REVOKE_WRITE => revoke_write(space, audit, sender_id, envelope),
        kinds::STREAM_TRANSFER_OWNERSHIP => transfer_ownership(space, sender_id, envelope),
        kinds::STREAM_CLOSE => close_stream(space, sender_id, envelope),
        other => Err(GatewayError::Internal {
            detail: format!("{other} is not a stream control kind"),
        }),
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, GatewayError> {
    serde_json::from_value(envelope.payload.clone()).map_err(|err| {
        GatewayError::MalformedPayload {
            kind: envelope.kind.clone(),
            detail: err.to_string(),
        }
    })
}

fn open_stream(
    space: &mut Space,
    sender_id: &str,
    envelope: &Envelope,
) -> Result<(), GatewayError> {
    let request: StreamRequest = parse_payload(envelope)?;

    let missing: Vec<String> = request
        .target
        .iter()
        .filter(|t| !space.participants.contains_key(*t))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(GatewayError::TargetNotFound { targets: missing });
    }

    let stream_id = space.next_stream_id();
    let entry = StreamEntry::from_request(
        stream_id.clone(),
        sender_id.to_string(),
        envelope.id.clone(),
        &request,
    );
    let encoding = entry
        .metadata
        .get("encoding")
        .and_then(Value::as_str)
        .map(str::to_string);
    let target = entry.target.clone();
    space.streams.insert(stream_id.clone(), entry);

    info!(space = %space.name, stream = %stream_id, owner = %sender_id, "stream opened");

    let open = Envelope::system(
        kinds::STREAM_OPEN,
        serde_json::to_value(StreamOpen {
            stream_id,
            encoding,
            target,
        })
        .unwrap_or(Value::Null),
    )
    .correlate([envelope.id.clone()]);
    broadcast(space, &open, None);
    Ok(())
}

fn grant_write(
    space: &mut Space,
    audit: &AuditLogs,
    sender_id: &str,
    envelope: &Envelope,
) -> Result<(), GatewayError> {
    let auth: WriteAuthorization = parse_payload(envelope)?;
    let stream = space
        .streams
        .get_mut(&auth.stream_id)
        .ok_or_else(|| GatewayError::StreamNotFound {
            stream_id: auth.stream_id.clone(),
        })?;
    if stream.owner != sender_id {
        return Err(GatewayError::Unauthorized {
            stream_id: auth.stream_id,
            detail: "only the owner may grant write access".to_string(),
        });
    }
    if !space.participants.contains_key(&auth.participant_id) {
        return Err(GatewayError::ParticipantNotFound {
            participant: auth.participant_id,
        });
    }

    stream.grant_writer(&auth.participant_id);
    let writers = stream.authorized_writers.clone();

    audit.record_decision(&CapabilityDecisionEntry {
        event: DecisionEvent::CapabilityGrant,
        envelope_id: envelope.id.clone(),
        participant: auth.participant_id.clone(),
        details: DecisionDetails {
            required_capability: kinds::STREAM_GRANT_WRITE.to_string(),
            granted_capabilities: Vec::new(),
            result: DecisionResult::Allowed,
            source: DecisionSource::RuntimeGrant,
            reason: auth.reason.clone(),
        },
        ts: chrono::Utc::now(),
    });

    let granted = Envelope::system(
        kinds::STREAM_WRITE_GRANTED,
        serde_json::to_value(WriteGranted {
            stream_id: auth.stream_id,
            participant_id: auth.participant_id,
            authorized_writers: writers,
        })
        .unwrap_or(Value::Null),
    )
    .correlate([envelope.id.clone()]);
    broadcast(space, &granted, None);
    Ok(())
}

fn revoke_write(
    space: &mut Space,
    audit: &AuditLogs,
    sender_id: &str,
    envelope: &Envelope,
) -> Result<(), GatewayError> {
    let auth: WriteAuthorization = parse_payload(envelope)?;
    let stream = space
        .streams
        .get_mut(&auth.stream_id)
        .ok_or_else(|| GatewayError::StreamNotFound {
            stream_id: auth.stream_id.clone(),
        })?;
    if stream.owner != sender_id {
        return Err(GatewayError::Unauthorized {
            stream_id: auth.stream_id,
            detail: "only the owner may revoke write access".to_string(),
        });
    }
    if auth.participant_id == stream.owner {
        return Err(GatewayError::Unauthorized {
            stream_id: auth.stream_id,
            detail: "the owner cannot revoke itself".to_string(),
        });
    }

    if stream.revoke_writer(&auth.participant_id) {
        audit.record_decision(&CapabilityDecisionEntry {
            event: DecisionEvent::CapabilityRevoke,
            envelope_id: envelope.id.clone(),
            participant: auth.participant_id.clone(),
            details: DecisionDetails {
                required_capability: kinds::STREAM_REVOKE_WRITE.to_string(),
                granted_capabilities: Vec::new(),
                result: DecisionResult::Allowed,
                source: DecisionSource::RuntimeGrant,
                reason: auth.reason.clone(),
            },
            ts: chrono::Utc::now(),
        });
    }
    Ok(())
}

fn transfer_ownership(
    space: &mut Space,
    sender_id: &str,
    envelope: &Envelope,
) -> Result<(), GatewayError> {
    let transfer: TransferOwnership = parse_payload(envelope)?;
    let stream = space
        .streams
        .get_mut(&transfer.stream_id)
        .ok_or_else(|| GatewayError::StreamNotFound {
            stream_id: transfer.stream_id.clone(),
        })?;
    if stream.owner != sender_id {
        return Err(GatewayError::Unauthorized {
            stream_id: transfer.stream_id,
            detail: "only the owner may transfer ownership".to_string(),
        });
    }
    if !space.participants.contains_key(&transfer.new_owner) {
        return Err(GatewayError::ParticipantNotFound {
            participant: transfer.new_owner,
        });
    }

    // The previous owner stays an authorized writer unless separately
    // revoked.
    let previous_owner = std::mem::replace(&mut stream.owner, transfer.new_owner.clone());
    stream.grant_writer(&transfer.new_owner);
    let writers = stream.authorized_writers.clone();

    info!(
        space = %space.name,
        stream = %transfer.stream_id,
        from = %previous_owner,
        to = %transfer.new_owner,
        "stream ownership transferred"
    );

    let transferred = Envelope::system(
        kinds::STREAM_OWNERSHIP_TRANSFERRED,
        serde_json::to_value(OwnershipTransferred {
            stream_id: transfer.stream_id,
            previous_owner,
            new_owner: transfer.new_owner,
            authorized_writers: writers,
        })
        .unwrap_or(Value::Null),
    )
    .correlate([envelope.id.clone()]);
    broadcast(space, &transferred, None);
    Ok(())
}

fn close_stream(
    space: &mut Space,
    sender_id: &str,
    envelope: &Envelope,
) -> Result<(), GatewayError> {
    let close: StreamClose = parse_payload(envelope)?;
    let stream = space
        .streams
        .get(&close.stream_id)
        .ok_or_else(|| GatewayError::StreamNotFound {
            stream_id: close.stream_id.clone(),
        })?;
    if stream.owner != sender_id {
        return Err(GatewayError::Unauthorized {
            stream_id: close.stream_id,
            detail: "only the owner may close the stream".to_string(),
        });
    }

    space.streams.remove(&close.stream_id);
    info!(space = %space.name, stream = %close.stream_id, "stream closed");

    let closed = Envelope::system(
        kinds::STREAM_CLOSE,
        serde_json::to_value(StreamClose {
            stream_id: close.stream_id,
            reason: None,
        })
        .unwrap_or(Value::Null),
    )
    .correlate([envelope.id.clone()]);
    broadcast(space, &closed, None);
    Ok(())
}

// ---------------------------------------------------------------------------
// Data frames
// ---------------------------------------------------------------------------

/// Route one raw data frame. The original text is delivered unchanged.
/// Returns the recipients whose outbound queue overflowed.
pub fn route_frame(space: &Space, sender_id: &str, frame: &StreamFrame, raw: &str) -> Vec<String> {
    let Some(stream) = space.streams.get(&frame.stream_id) else {
        warn!(
            space = %space.name,
            stream = %frame.stream_id,
            sender = %sender_id,
            "frame for unknown stream dropped"
        );
        return Vec::new();
    };
    if !stream.is_writer(sender_id) {
        warn!(
            space = %space.name,
            stream = %frame.stream_id,
            sender = %sender_id,
            "unauthorized stream write dropped"
        );
        return Vec::new();
    }

    let mut overflowed = Vec::new();
    if stream.target.is_empty() {
        for (id, participant) in &space.participants {
            if id == sender_id {
                continue;
            }
            if participant.enqueue(raw.to_string()) == EnqueueOutcome::Overflow {
                overflowed.push(id.clone());
            }
        }
    } else {
        for target in &stream.target {
            match space.participants.get(target) {
                Some(participant) => {
                    if participant.enqueue(raw.to_string()) == EnqueueOutcome::Overflow {
                        overflowed.push(target.clone());
                    }
                }
                None => {
                    debug!(
                        space = %space.name,
                        stream = %frame.stream_id,
                        target = %target,
                        "frame target disconnected; skipped"
                    );
                }
            }
        }
    }
    overflowed
}

// ---------------------------------------------------------------------------
// Disconnect policy
// ---------------------------------------------------------------------------

/// Apply the disconnect policy for `participant_id`: auto-revoke non-owner
/// writes and close owned streams. Returns the `stream/close` broadcasts to
/// emit.
pub fn cleanup_for_disconnect(
    space: &mut Space,
    audit: &AuditLogs,
    participant_id: &str,
) -> Vec<Envelope> {
    let mut closed = Vec::new();
    let mut owned = Vec::new();

    for (stream_id, stream) in &mut space.streams {
        if stream.owner == participant_id {
            owned.push(stream_id.clone());
        } else if stream.revoke_writer(participant_id) {
            info!(
                space = %space.name,
                stream = %stream_id,
                participant = %participant_id,
                "write access auto-revoked on disconnect"
            );
            audit.record_decision(&CapabilityDecisionEntry {
                event: DecisionEvent::CapabilityRevoke,
                envelope_id: String::new(),
                participant: participant_id.to_string(),
                details: DecisionDetails {
                    required_capability: kinds::STREAM_REVOKE_WRITE.to_string(),
                    granted_capabilities: Vec::new(),
                    result: DecisionResult::Allowed,
                    source: DecisionSource::RuntimeGrant,
                    reason: Some("writer disconnected".to_string()),
                },
                ts: chrono::Utc::now(),
            });
        }
    }

    for stream_id in owned {
        space.streams.remove(&stream_id);
        info!(
            space = %space.name,
            stream = %stream_id,
            owner = %participant_id,
            "stream closed on owner disconnect"
        );
        closed.push(Envelope::system(
            kinds::STREAM_CLOSE,
            serde_json::to_value(StreamClose {
                stream_id,
                reason: Some("owner_disconnected".to_string()),
            })
            .unwrap_or(Value::Null),
        ));
    }

    closed
}
