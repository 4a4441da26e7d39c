// SPDX-License-Identifier: MIT OR Apache-2.0
//! Gateway error taxonomy.
//!
//! Every routing failure surfaces as a `system/error` envelope directed at
//! the responsible participant, carrying a stable machine-readable code.
//! Only protocol and identity violations are fatal to the connection.

use mew_core::{Capability, Envelope, kinds, system::SystemError};
use mew_protocol::ValidateError;
use thiserror::Error;

/// A routing-level failure attributable to one participant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// The sender's capability set denied the envelope.
    #[error("capability denied for kind {kind:?}")]
    OperationFailed {
        /// The kind the sender attempted.
        kind: String,
        /// The sender's grants at denial time.
        capabilities: Vec<Capability>,
        /// Matcher-provided denial reason.
        reason: String,
    },

    /// A stream request named recipients that are not in the space.
    #[error("stream targets not found: {targets:?}")]
    TargetNotFound {
        /// The missing IDs.
        targets: Vec<String>,
    },

    /// A stream authorization referenced an unknown stream.
    #[error("stream {stream_id:?} not found")]
    StreamNotFound {
        /// The unknown stream.
        stream_id: String,
    },

    /// A non-owner attempted grant/revoke/transfer/close, or an owner tried
    /// to revoke itself.
    #[error("unauthorized stream operation on {stream_id:?}: {detail}")]
    Unauthorized {
        /// The stream concerned.
        stream_id: String,
        /// What was refused and why.
        detail: String,
    },

    /// A grant or transfer named a participant absent from the space.
    #[error("participant {participant:?} not found")]
    ParticipantNotFound {
        /// The missing participant.
        participant: String,
    },

    /// An envelope payload did not have the shape its kind requires.
    #[error("malformed {kind:?} payload: {detail}")]
    MalformedPayload {
        /// The envelope kind.
        kind: String,
        /// Parse failure detail.
        detail: String,
    },

    /// Internal inconsistency; never expected.
    #[error("gateway inconsistency: {detail}")]
    Internal {
        /// What went wrong.
        detail: String,
    },
}

impl GatewayError {
    /// Stable `system/error` code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OperationFailed { .. } => "operation_failed",
            Self::TargetNotFound { .. } => "target_not_found",
            Self::StreamNotFound { .. } => "stream_not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::ParticipantNotFound { .. } => "participant_not_found",
            Self::MalformedPayload { .. } => "parse_error",
            Self::Internal { .. } => "gateway_error",
        }
    }

    /// Build the `system/error` payload for this failure.
    #[must_use]
    pub fn to_payload(&self) -> SystemError {
        let mut payload = SystemError::new(self.code()).with_message(self.to_string());
        match self {
            Self::OperationFailed {
                kind, capabilities, ..
            } => {
                payload.attempted_kind = Some(kind.clone());
                payload.your_capabilities = Some(capabilities.clone());
            }
            Self::TargetNotFound { targets } => {
                payload.targets = Some(targets.clone());
            }
            _ => {}
        }
        payload
    }

    /// Build the directed `system/error` envelope, correlated to the
    /// envelope that caused the failure when one exists.
    #[must_use]
    pub fn to_envelope(&self, recipient: &str, caused_by: Option<&str>) -> Envelope {
        let payload =
            serde_json::to_value(self.to_payload()).unwrap_or(serde_json::Value::Null);
        let mut envelope = Envelope::system(kinds::SYSTEM_ERROR, payload).to([recipient]);
        if let Some(id) = caused_by {
            envelope = envelope.correlate([id]);
        }
        envelope
    }
}

/// Build the `system/error` envelope for a validation failure.
#[must_use]
pub fn validation_error_envelope(
    err: &ValidateError,
    recipient: &str,
    caused_by: Option<&str>,
) -> Envelope {
    let payload = SystemError::new(err.code()).with_message(err.to_string());
    let payload = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
    let mut envelope = Envelope::system(kinds::SYSTEM_ERROR, payload).to([recipient]);
    if let Some(id) = caused_by {
        envelope = envelope.correlate([id]);
    }
    envelope
}
