// SPDX-License-Identifier: MIT OR Apache-2.0
//! Audit record shapes for the two JSONL logs.

use chrono::{DateTime, Utc};
use mew_core::{Capability, Envelope};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope history
// ---------------------------------------------------------------------------

/// What happened to an envelope at the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEvent {
    /// Accepted from a connection.
    Received,
    /// Handed to a recipient's outbound queue.
    Delivered,
    /// Rejected, or a recipient could not be reached.
    Failed,
    /// An implementation-side timer expired.
    Timeout,
}

/// Free-form delivery metadata attached to a history record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryMetadata {
    /// Originating connection, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    /// Gateway-side processing time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,

    /// Delivery retry count (always 0 at the gateway; no retries).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    /// Recipient a `delivered`/`failed` record refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    /// Failure detail, e.g. `no_connection` or an error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Accept-to-enqueue latency for a delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// One line of `envelope-history.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeHistoryEntry {
    /// What happened.
    pub event: HistoryEvent,

    /// The envelope's ID, duplicated for cheap grepping.
    pub id: String,

    /// The full envelope.
    pub envelope: Envelope,

    /// Delivery metadata.
    #[serde(default)]
    pub metadata: HistoryMetadata,

    /// When the record was written.
    pub ts: DateTime<Utc>,
}

impl EnvelopeHistoryEntry {
    /// Record acceptance of an envelope from `connection_id`.
    #[must_use]
    pub fn received(envelope: &Envelope, connection_id: impl Into<String>) -> Self {
        Self {
            event: HistoryEvent::Received,
            id: envelope.id.clone(),
            envelope: envelope.clone(),
            metadata: HistoryMetadata {
                connection_id: Some(connection_id.into()),
                ..HistoryMetadata::default()
            },
            ts: Utc::now(),
        }
    }

    /// Record a per-recipient delivery.
    #[must_use]
    pub fn delivered(envelope: &Envelope, recipient: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            event: HistoryEvent::Delivered,
            id: envelope.id.clone(),
            envelope: envelope.clone(),
            metadata: HistoryMetadata {
                recipient: Some(recipient.into()),
                latency_ms: Some(latency_ms),
                ..HistoryMetadata::default()
            },
            ts: Utc::now(),
        }
    }

    /// Record a rejection or unreachable recipient.
    #[must_use]
    pub fn failed(envelope: &Envelope, status: impl Into<String>) -> Self {
        Self {
            event: HistoryEvent::Failed,
            id: envelope.id.clone(),
            envelope: envelope.clone(),
            metadata: HistoryMetadata {
                status: Some(status.into()),
                ..HistoryMetadata::default()
            },
            ts: Utc::now(),
        }
    }

    /// Attach a recipient to a failure record.
    #[must_use]
    pub fn for_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.metadata.recipient = Some(recipient.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Capability decisions
// ---------------------------------------------------------------------------

/// What kind of decision was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionEvent {
    /// An envelope was evaluated against the sender's grants.
    CapabilityCheck,
    /// A routing choice that depended on grants.
    RoutingDecision,
    /// Grants were added (e.g. `system/register`).
    CapabilityGrant,
    /// Grants were removed.
    CapabilityRevoke,
}

/// Allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionResult {
    /// The operation was permitted.
    Allowed,
    /// The operation was refused.
    Denied,
}

/// Where the evaluated grants came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The declarative space tables.
    SpaceConfig,
    /// A human approved interactively.
    InteractiveApproval,
    /// Granted at runtime (`system/register`).
    RuntimeGrant,
}

/// The substance of a capability decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionDetails {
    /// The kind (or operation) that required authorization.
    pub required_capability: String,

    /// The sender's grants at decision time.
    pub granted_capabilities: Vec<Capability>,

    /// Outcome.
    pub result: DecisionResult,

    /// Provenance of the grants.
    pub source: DecisionSource,

    /// Denial reason, when denied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One line of `capability-decisions.jsonl`. Carries the envelope ID so the
/// two logs correlate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDecisionEntry {
    /// What kind of decision this is.
    pub event: DecisionEvent,

    /// The envelope that triggered it.
    pub envelope_id: String,

    /// The participant the decision concerns.
    pub participant: String,

    /// Decision substance.
    pub details: DecisionDetails,

    /// When the record was written.
    pub ts: DateTime<Utc>,
}

impl CapabilityDecisionEntry {
    /// Record a capability check outcome for an envelope.
    #[must_use]
    pub fn check(
        envelope_id: impl Into<String>,
        participant: impl Into<String>,
        details: DecisionDetails,
    ) -> Self {
        Self {
            event: DecisionEvent::CapabilityCheck,
            envelope_id: envelope_id.into(),
            participant: participant.into(),
            details,
            ts: Utc::now(),
        }
    }

    /// Record a runtime capability grant.
    #[must_use]
    pub fn grant(
        envelope_id: impl Into<String>,
        participant: impl Into<String>,
        granted: Vec<Capability>,
    ) -> Self {
        Self {
            event: DecisionEvent::CapabilityGrant,
            envelope_id: envelope_id.into(),
            participant: participant.into(),
            details: DecisionDetails {
                required_capability: mew_core::kinds::SYSTEM_REGISTER.to_string(),
                granted_capabilities: granted,
                result: DecisionResult::Allowed,
                source: DecisionSource::RuntimeGrant,
                reason: None,
            },
            ts: Utc::now(),
        }
    }
}
