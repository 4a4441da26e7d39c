// SPDX-License-Identifier: MIT OR Apache-2.0
//! Text-frame classification and envelope (de)serialization.

use crate::frame::StreamFrame;
use mew_core::Envelope;
use thiserror::Error;

/// A classified inbound WebSocket text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A JSON envelope.
    Envelope(Box<Envelope>),
    /// A raw stream data frame (`#<stream_id>#<bytes>`).
    Frame(StreamFrame),
}

/// Errors produced while decoding inbound text.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The text began with `#` but was not a well-formed stream frame.
    #[error("malformed stream frame")]
    MalformedFrame,

    /// The text was not a valid JSON envelope.
    #[error("invalid envelope: {reason}")]
    Parse {
        /// Underlying serde error rendering.
        reason: String,
    },
}

/// Classify and decode one inbound text frame.
///
/// Text starting with `#` is parsed as a stream frame and never touches the
/// JSON parser. Everything else must be a JSON envelope.
pub fn decode_text(text: &str) -> Result<Inbound, DecodeError> {
    if text.starts_with('#') {
        return StreamFrame::parse(text)
            .map(Inbound::Frame)
            .ok_or(DecodeError::MalformedFrame);
    }

    serde_json::from_str::<Envelope>(text)
        .map(|env| Inbound::Envelope(Box::new(env)))
        .map_err(|err| DecodeError::Parse {
            reason: err.to_string(),
        })
}

/// Serialize an envelope to its wire form.
///
/// Serialization is deterministic: field order is fixed by the struct
/// definition and empty optional fields are omitted.
pub fn encode(envelope: &Envelope) -> String {
    // Envelope contains only JSON-representable types; serialization cannot
    // fail.
    serde_json::to_string(envelope).expect("envelope serialization")
}
