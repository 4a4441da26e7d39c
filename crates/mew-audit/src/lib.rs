// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-audit
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Append-only JSON-Lines audit trails for the gateway: one file for
//! envelope history, one for capability decisions. Appends go through a
//! bounded channel to a dedicated writer task so the routing hot path never
//! blocks on disk.

pub mod entry;
pub mod sink;

pub use entry::{
    CapabilityDecisionEntry, DecisionDetails, DecisionEvent, DecisionResult, DecisionSource,
    EnvelopeHistoryEntry, HistoryEvent, HistoryMetadata,
};
pub use sink::{AuditLogs, JsonlSink};

/// File name of the envelope-history log inside the log directory.
pub const ENVELOPE_HISTORY_FILE: &str = "envelope-history.jsonl";

/// File name of the capability-decision log inside the log directory.
pub const CAPABILITY_DECISIONS_FILE: &str = "capability-decisions.jsonl";
