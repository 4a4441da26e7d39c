// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for MEW (Multi-Entity Workspace): the envelope wire
//! shape, message kinds, capability grants as data, and the payload types
//! exchanged with the gateway.
//!
//! If you only take one dependency, take this one.

/// Context topics and sub-context operations.
pub mod context;
/// Well-known message kinds.
pub mod kinds;
/// Stream descriptors and stream control payloads.
pub mod stream;
/// Gateway-originated payloads: welcome, presence, errors, status.
pub mod system;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use context::{ContextField, ContextOp, ContextOperation};

/// Current protocol version string carried in every envelope.
///
/// # Examples
///
/// ```
/// assert_eq!(mew_core::PROTOCOL_VERSION, "mew/v0.4");
/// ```
pub const PROTOCOL_VERSION: &str = "mew/v0.4";

/// Participant identifier the gateway uses for self-originated envelopes.
pub const GATEWAY_ID: &str = "system:gateway";

/// Returns `true` when `from` names a system identity (`system:` prefix).
///
/// Envelopes from system identities bypass capability checks.
#[must_use]
pub fn is_system_sender(from: &str) -> bool {
    from.starts_with("system:")
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The universal message routed between participants.
///
/// One envelope per WebSocket text frame, JSON-encoded. An empty `to` list
/// means broadcast. `correlation_id` is an ordered list of envelope IDs this
/// message references; scalar forms are accepted on decode and normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire protocol version; must equal [`PROTOCOL_VERSION`] inbound.
    pub protocol: String,

    /// Identifier unique within the space for the lifetime of its history.
    pub id: String,

    /// Instant the envelope was produced.
    pub ts: DateTime<Utc>,

    /// Sending participant. Must match the authenticated identity on the
    /// originating connection.
    pub from: String,

    /// Ordered recipient list; empty means broadcast to all but the sender.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub to: Vec<String>,

    /// Hierarchical message kind, e.g. `mcp/request`, `stream/open`, `chat`.
    pub kind: String,

    /// Envelope IDs this message references (a fulfillment carries its
    /// proposal's ID here).
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub correlation_id: Vec<String>,

    /// Context topic or sub-context operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextField>,

    /// Kind-specific payload, opaque to the router.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create an envelope from a participant with a fresh ID and timestamp.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            protocol: PROTOCOL_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            from: from.into(),
            to: Vec::new(),
            kind: kind.into(),
            correlation_id: Vec::new(),
            context: None,
            payload,
        }
    }

    /// Create a gateway-originated envelope (`from = "system:gateway"`).
    #[must_use]
    pub fn system(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(GATEWAY_ID, kind, payload)
    }

    /// Set the recipient list.
    #[must_use]
    pub fn to<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// Set the correlation chain.
    #[must_use]
    pub fn correlate<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.correlation_id = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the auto-assigned envelope ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach a context topic or operation.
    #[must_use]
    pub fn with_context(mut self, context: ContextField) -> Self {
        self.context = Some(context);
        self
    }

    /// Returns `true` when the envelope has no explicit recipients.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    /// Returns `true` when the sender is a system identity.
    #[must_use]
    pub fn is_system(&self) -> bool {
        is_system_sender(&self.from)
    }
}

/// Accept either a scalar string or a list of strings, normalizing to a list.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A capability grant as configuration data.
///
/// A capability permits (or, with a `!`-prefixed kind, forbids) a class of
/// envelopes. Pattern *evaluation* lives in `mew-capability`; this type is
/// the serialized form that space configs and `system/register` carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Optional administrative label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Kind pattern: exact, `*`, `prefix/*`, `*/suffix`, `a/*/b`, or a
    /// negative `!pattern`.
    pub kind: String,

    /// Optional recipient constraint: a pattern or list of patterns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PatternList>,

    /// Optional nested payload pattern (literals, `*` wildcards, object
    /// recursion, array subset matching).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Capability {
    /// Grant for a single kind pattern with no recipient or payload
    /// constraints.
    #[must_use]
    pub fn kind(pattern: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: pattern.into(),
            to: None,
            payload: None,
        }
    }

    /// Returns `true` when the kind pattern is negative (`!`-prefixed).
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.kind.starts_with('!')
    }
}

/// One pattern or a list of patterns, as configs write them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternList {
    /// A single pattern string.
    One(String),
    /// Several alternatives; any match suffices.
    Many(Vec<String>),
}

impl PatternList {
    /// View the alternatives as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::One(p) => std::slice::from_ref(p),
            Self::Many(ps) => ps.as_slice(),
        }
    }
}
