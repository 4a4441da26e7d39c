// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stream data frames: `#<stream_id>#<bytes>`.
//!
//! Frames are raw WebSocket text, not JSON. The bytes between the second
//! hash and the end of the frame are delivered to recipients unchanged.

/// A parsed stream data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Stream the frame belongs to, matching `stream-[0-9]+`.
    pub stream_id: String,

    /// Frame payload, arbitrary text (binary by agreement, e.g. base64).
    pub data: String,
}

impl StreamFrame {
    /// Build a frame for the given stream.
    #[must_use]
    pub fn new(stream_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            data: data.into(),
        }
    }

    /// Serialize back to the wire form `#<stream_id>#<data>`.
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("#{}#{}", self.stream_id, self.data)
    }

    /// Parse a text frame that begins with `#`. Returns `None` when the
    /// frame is malformed or the stream ID is not of the form `stream-<n>`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix('#')?;
        let sep = rest.find('#')?;
        let (stream_id, data) = rest.split_at(sep);
        if !is_valid_stream_id(stream_id) {
            return None;
        }
        Some(Self {
            stream_id: stream_id.to_string(),
            data: data[1..].to_string(),
        })
    }
}

/// Check `^stream-[0-9]+$`.
#[must_use]
pub fn is_valid_stream_id(id: &str) -> bool {
    match id.strip_prefix("stream-") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
