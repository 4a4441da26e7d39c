// SPDX-License-Identifier: MIT OR Apache-2.0
//! Context topics and sub-context stack operations.
//!
//! An envelope's `context` field is either a free-form topic string or an
//! operation on the sender's per-participant context stack.

use serde::{Deserialize, Serialize};

/// The `context` field of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextField {
    /// A sub-context stack operation.
    Operation(ContextOperation),
    /// A plain context-topic string.
    Topic(String),
}

/// Operation applied to the sender's context stack when the envelope is
/// accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextOp {
    /// Push a correlation ID onto the stack.
    Push,
    /// Pop the top of the stack.
    Pop,
    /// Move an existing correlation ID to the top of the stack.
    Resume,
}

/// A sub-context operation with its optional subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextOperation {
    /// Which stack operation to apply.
    pub operation: ContextOp,

    /// The correlation ID the operation refers to. For `push`, absent means
    /// the envelope's own ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ContextField {
    /// Convenience constructor for a push operation.
    #[must_use]
    pub fn push(correlation_id: impl Into<String>) -> Self {
        Self::Operation(ContextOperation {
            operation: ContextOp::Push,
            correlation_id: Some(correlation_id.into()),
        })
    }

    /// Convenience constructor for a pop operation.
    #[must_use]
    pub fn pop() -> Self {
        Self::Operation(ContextOperation {
            operation: ContextOp::Pop,
            correlation_id: None,
        })
    }

    /// Convenience constructor for a resume operation.
    #[must_use]
    pub fn resume(correlation_id: impl Into<String>) -> Self {
        Self::Operation(ContextOperation {
            operation: ContextOp::Resume,
            correlation_id: Some(correlation_id.into()),
        })
    }
}
