// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inbound envelope validation.
//!
//! These checks run after decoding and before capability evaluation. Each
//! failure maps to a stable `system/error` code; a fatal failure closes the
//! connection after the error is sent.

use mew_core::{Envelope, PROTOCOL_VERSION};
use thiserror::Error;

/// A rejected inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidateError {
    /// `protocol` does not equal the supported version.
    #[error("unsupported protocol {got:?}, expected {PROTOCOL_VERSION:?}")]
    ProtocolMismatch {
        /// The version the sender claimed.
        got: String,
    },

    /// `from` does not match the connection's authenticated participant.
    #[error("envelope from {claimed:?} does not match authenticated participant {authenticated:?}")]
    UnauthorizedFrom {
        /// The identity the envelope claimed.
        claimed: String,
        /// The identity bound to the connection.
        authenticated: String,
    },

    /// `kind` is empty.
    #[error("envelope kind must be a non-empty string")]
    MissingKind,

    /// `id` is empty.
    #[error("envelope id must be a non-empty string")]
    MissingId,

    /// The envelope ID already appears in recent history.
    #[error("duplicate envelope id {id:?}")]
    DuplicateId {
        /// The repeated identifier.
        id: String,
    },

    /// The raw text frame exceeded the configured maximum.
    #[error("message of {size} bytes exceeds limit of {max}")]
    TooLarge {
        /// Observed frame size.
        size: usize,
        /// Configured ceiling.
        max: usize,
    },
}

impl ValidateError {
    /// Stable `system/error` code for this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProtocolMismatch { .. } => "protocol_mismatch",
            Self::UnauthorizedFrom { .. } => "unauthorized_from",
            Self::MissingKind | Self::MissingId | Self::DuplicateId { .. } => "parse_error",
            Self::TooLarge { .. } => "message_too_large",
        }
    }

    /// Whether the connection must be closed after reporting this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolMismatch { .. } | Self::UnauthorizedFrom { .. }
        )
    }
}

/// Enforce the raw frame size cap before any parsing.
pub fn check_size(size: usize, max: usize) -> Result<(), ValidateError> {
    if size > max {
        return Err(ValidateError::TooLarge { size, max });
    }
    Ok(())
}

/// Validate a decoded envelope against the connection identity.
///
/// The duplicate-ID guard is the caller's concern (it needs the space's
/// history ring); pass the ring lookup through `seen_recently`.
pub fn validate_inbound(
    envelope: &Envelope,
    authenticated_from: &str,
    seen_recently: impl Fn(&str) -> bool,
) -> Result<(), ValidateError> {
    if envelope.protocol != PROTOCOL_VERSION {
        return Err(ValidateError::ProtocolMismatch {
            got: envelope.protocol.clone(),
        });
    }
    if envelope.from != authenticated_from {
        return Err(ValidateError::UnauthorizedFrom {
            claimed: envelope.from.clone(),
            authenticated: authenticated_from.to_string(),
        });
    }
    if envelope.kind.is_empty() {
        return Err(ValidateError::MissingKind);
    }
    if envelope.id.is_empty() {
        return Err(ValidateError::MissingId);
    }
    if seen_recently(&envelope.id) {
        return Err(ValidateError::DuplicateId {
            id: envelope.id.clone(),
        });
    }
    Ok(())
}
