// SPDX-License-Identifier: MIT OR Apache-2.0
//! Payloads of gateway-originated system envelopes and participant status
//! reports.

use crate::Capability;
use crate::stream::StreamInfo;
use serde::{Deserialize, Serialize};

/// A participant as seen by its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Participant identifier, unique per space.
    pub id: String,

    /// The participant's current capability grants.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Capability>,
}

/// Payload of `system/welcome` (gateway → joining participant, directed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    /// The joining participant's own identity and capabilities.
    pub you: ParticipantInfo,

    /// Every current peer with its capabilities.
    pub participants: Vec<ParticipantInfo>,

    /// Every open stream's metadata, so late joiners can reconstruct stream
    /// topology immediately.
    pub active_streams: Vec<StreamInfo>,
}

/// Presence change announced to a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceEvent {
    /// A participant joined.
    Join,
    /// A participant left.
    Leave,
    /// A participant's capability set changed.
    Update,
    /// Liveness marker.
    Heartbeat,
}

/// Payload of `system/presence` (gateway → broadcast).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    /// What happened.
    pub event: PresenceEvent,

    /// The participant the event concerns.
    pub participant: ParticipantInfo,
}

/// Payload of `system/error` (gateway → responsible participant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemError {
    /// Stable machine-readable code (e.g. `operation_failed`).
    pub error: String,

    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// The kind the sender attempted, on capability denials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_kind: Option<String>,

    /// The sender's current grants, on capability denials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub your_capabilities: Option<Vec<Capability>>,

    /// Missing recipients, on `target_not_found`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

impl SystemError {
    /// Create an error payload with only a code.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
            attempted_kind: None,
            your_capabilities: None,
            targets: None,
        }
    }

    /// Attach a human-readable message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Payload of `system/register` (participant → gateway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    /// Capabilities to merge into the sender's set.
    pub capabilities: Vec<Capability>,
}

/// A participant's lifecycle status as reported in `participant/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Normal operation.
    Active,
    /// Refraining from initiating messages outside the pause allow-list.
    Paused,
    /// Context usage crossed the warning threshold.
    NearLimit,
    /// Trimming local context in response to `participant/forget`.
    Compacting,
    /// Finished trimming local context.
    Compacted,
    /// Context counters were zeroed.
    Cleared,
    /// Internal state was re-initialized.
    Restarted,
    /// Final status before disconnecting.
    ShuttingDown,
}

/// Payload of `participant/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Current lifecycle status. Always present.
    pub status: ParticipantStatus,

    /// Messages currently held in context. Always present.
    pub messages_in_context: u64,

    /// Advisory token usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,

    /// Advisory token ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn welcome_roundtrip() {
        let welcome = Welcome {
            you: ParticipantInfo {
                id: "alice".into(),
                capabilities: vec![Capability::kind("chat")],
            },
            participants: vec![ParticipantInfo {
                id: "bob".into(),
                capabilities: vec![Capability::kind("*")],
            }],
            active_streams: vec![],
        };
        let back: Welcome =
            serde_json::from_str(&serde_json::to_string(&welcome).unwrap()).unwrap();
        assert_eq!(back, welcome);
    }

    #[test]
    fn presence_event_snake_case() {
        assert_eq!(
            serde_json::to_value(PresenceEvent::Join).unwrap(),
            json!("join")
        );
        assert_eq!(
            serde_json::to_value(PresenceEvent::Update).unwrap(),
            json!("update")
        );
    }

    #[test]
    fn system_error_minimal_shape() {
        let v = serde_json::to_value(SystemError::new("parse_error")).unwrap();
        assert_eq!(v, json!({"error": "parse_error"}));
    }

    #[test]
    fn system_error_capability_denial_shape() {
        let err = SystemError {
            error: "operation_failed".into(),
            message: Some("capability denied".into()),
            attempted_kind: Some("chat".into()),
            your_capabilities: Some(vec![Capability::kind("!chat")]),
            targets: None,
        };
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["attempted_kind"], "chat");
        assert_eq!(v["your_capabilities"][0]["kind"], "!chat");
    }

    #[test]
    fn status_report_always_carries_required_fields() {
        let report = StatusReport {
            status: ParticipantStatus::Paused,
            messages_in_context: 12,
            tokens: None,
            max_tokens: None,
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v, json!({"status": "paused", "messages_in_context": 12}));
    }

    #[test]
    fn shutting_down_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(ParticipantStatus::ShuttingDown).unwrap(),
            json!("shutting_down")
        );
        assert_eq!(
            serde_json::to_value(ParticipantStatus::NearLimit).unwrap(),
            json!("near_limit")
        );
    }
}
