// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Capability pattern compilation and envelope matching.
//!
//! A participant holds an ordered list of [`Capability`] grants. Each grant
//! is compiled once into a [`CompiledCapability`] and then evaluated per
//! envelope: the participant may send iff some positive grant matches and no
//! negative (`!`-prefixed) grant matches. Matching itself is a pure
//! function, safe for parallel evaluation.

use mew_core::{Capability, Envelope};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// A compiled string pattern: exact text or a single-`*` wildcard.
///
/// `*` matches any string, `prefix/*` any string with that prefix,
/// `*/suffix` any string with that suffix, and `a/*/b` requires both halves
/// around the wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringPattern {
    /// Matches only the exact text.
    Exact(String),
    /// Matches `head` + anything + `tail`.
    Wildcard {
        /// Required prefix (may be empty).
        head: String,
        /// Required suffix (may be empty).
        tail: String,
    },
}

impl StringPattern {
    /// Compile a pattern string. Only the first `*` is a wildcard.
    #[must_use]
    pub fn compile(pattern: &str) -> Self {
        match pattern.split_once('*') {
            Some((head, tail)) => Self::Wildcard {
                head: head.to_string(),
                tail: tail.to_string(),
            },
            None => Self::Exact(pattern.to_string()),
        }
    }

    /// Evaluate the pattern against a candidate string.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(text) => candidate == text,
            Self::Wildcard { head, tail } => {
                candidate.len() >= head.len() + tail.len()
                    && candidate.starts_with(head.as_str())
                    && candidate.ends_with(tail.as_str())
            }
        }
    }
}

/// Deep-match a payload pattern against a payload value.
///
/// Rules: the string `"*"` matches any value; other strings match string
/// values by [`StringPattern`] rules; objects recurse (every pattern key
/// must match); pattern arrays are subset-matched (each pattern element must
/// match some value element); remaining primitives compare for equality.
#[must_use]
pub fn payload_matches(pattern: &Value, value: &Value) -> bool {
    match pattern {
        Value::String(p) if p == "*" => true,
        Value::String(p) => match value {
            Value::String(v) => StringPattern::compile(p).matches(v),
            _ => false,
        },
        Value::Object(pm) => match value {
            Value::Object(vm) => pm
                .iter()
                .all(|(key, pv)| vm.get(key).is_some_and(|vv| payload_matches(pv, vv))),
            _ => false,
        },
        Value::Array(pa) => match value {
            Value::Array(va) => pa
                .iter()
                .all(|pe| va.iter().any(|ve| payload_matches(pe, ve))),
            _ => false,
        },
        other => other == value,
    }
}

// ---------------------------------------------------------------------------
// CompiledCapability
// ---------------------------------------------------------------------------

/// A [`Capability`] precompiled for per-envelope evaluation.
#[derive(Debug, Clone)]
pub struct CompiledCapability {
    source: Capability,
    negative: bool,
    kind: StringPattern,
    to: Option<Vec<StringPattern>>,
    payload: Option<Value>,
}

impl CompiledCapability {
    /// Compile a grant. Any pattern string is valid; compilation cannot
    /// fail.
    #[must_use]
    pub fn compile(capability: &Capability) -> Self {
        let kind_text = capability.kind.strip_prefix('!').unwrap_or(&capability.kind);
        Self {
            negative: capability.is_negative(),
            kind: StringPattern::compile(kind_text),
            to: capability.to.as_ref().map(|patterns| {
                patterns
                    .as_slice()
                    .iter()
                    .map(|p| StringPattern::compile(p))
                    .collect()
            }),
            payload: capability.payload.clone(),
            source: capability.clone(),
        }
    }

    /// The grant this was compiled from.
    #[must_use]
    pub fn source(&self) -> &Capability {
        &self.source
    }

    /// Whether this grant is a veto (`!`-prefixed kind).
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Evaluate every specified field pattern against the envelope.
    #[must_use]
    pub fn matches(&self, envelope: &Envelope) -> bool {
        if !self.kind.matches(&envelope.kind) {
            return false;
        }
        if let Some(to_patterns) = &self.to {
            // Any recipient matching any pattern suffices.
            let any = envelope
                .to
                .iter()
                .any(|recipient| to_patterns.iter().any(|p| p.matches(recipient)));
            if !any {
                return false;
            }
        }
        if let Some(pattern) = &self.payload
            && !payload_matches(pattern, &envelope.payload)
        {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// CapabilitySet
// ---------------------------------------------------------------------------

/// Outcome of evaluating a participant's full grant list for one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// A positive grant matched and no veto applied.
    Allowed {
        /// The first matching positive grant.
        grant: Capability,
    },
    /// A negative grant matched; vetoes win regardless of positive matches.
    Vetoed {
        /// The matching veto.
        veto: Capability,
    },
    /// No positive grant matched.
    NoGrant,
}

impl Decision {
    /// Returns `true` only for [`Decision::Allowed`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Short denial reason for audit records; `None` when allowed.
    #[must_use]
    pub fn denial_reason(&self) -> Option<String> {
        match self {
            Self::Allowed { .. } => None,
            Self::Vetoed { veto } => Some(format!("excluded by {:?}", veto.kind)),
            Self::NoGrant => Some("no matching capability".to_string()),
        }
    }
}

/// A participant's compiled, ordered grant list.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    compiled: Vec<CompiledCapability>,
}

impl CapabilitySet {
    /// Compile a list of grants, preserving order.
    #[must_use]
    pub fn compile(grants: &[Capability]) -> Self {
        Self {
            compiled: grants.iter().map(CompiledCapability::compile).collect(),
        }
    }

    /// Evaluate the set for one envelope: `(∃ positive match) ∧ (∄ veto)`.
    ///
    /// A matching veto always wins; a negative grant alone never permits.
    #[must_use]
    pub fn decision(&self, envelope: &Envelope) -> Decision {
        if let Some(veto) = self
            .compiled
            .iter()
            .find(|c| c.is_negative() && c.matches(envelope))
        {
            return Decision::Vetoed {
                veto: veto.source().clone(),
            };
        }
        match self
            .compiled
            .iter()
            .find(|c| !c.is_negative() && c.matches(envelope))
        {
            Some(grant) => Decision::Allowed {
                grant: grant.source().clone(),
            },
            None => Decision::NoGrant,
        }
    }

    /// Merge additional grants, skipping duplicates. Returns `true` when
    /// the set changed.
    pub fn merge(&mut self, extra: &[Capability]) -> bool {
        let mut changed = false;
        for cap in extra {
            if !self.compiled.iter().any(|c| c.source() == cap) {
                self.compiled.push(CompiledCapability::compile(cap));
                changed = true;
            }
        }
        changed
    }

    /// The source grants, in evaluation order.
    #[must_use]
    pub fn grants(&self) -> Vec<Capability> {
        self.compiled.iter().map(|c| c.source().clone()).collect()
    }

    /// Number of grants in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    /// Whether the set holds no grants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}
