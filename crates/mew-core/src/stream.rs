// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stream descriptors and the payloads of stream control envelopes.
//!
//! Streams are gateway-managed side channels for raw data frames. The
//! envelope payloads here open, authorize, transfer, and close them; the
//! frames themselves never pass through JSON (see `mew-protocol`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Direction of a stream relative to its requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamDirection {
    /// Requester writes, others read.
    Upload,
    /// Requester reads, others write.
    Download,
}

/// Payload of `stream/request` (participant → gateway).
///
/// Unknown fields are preserved verbatim in `metadata` and echoed back in
/// [`StreamInfo`] so late joiners see whatever the opener attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// Upload or download.
    pub direction: StreamDirection,

    /// MIME-ish content type of the frames, by agreement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Application-level frame format label (e.g. `pos/v1`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Advisory size hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_size_bytes: Option<u64>,

    /// Human-readable purpose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Explicit recipients for data frames; empty means broadcast. Every
    /// listed ID must exist in the space at request time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<String>,

    /// Any additional fields, preserved as-is.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Payload of `stream/open` (gateway → requester, broadcast-visible).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOpen {
    /// Gateway-assigned identifier, `stream-<n>`.
    pub stream_id: String,

    /// Frame encoding agreed for this stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    /// Echo of the request's target list, when present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<String>,
}

/// A stream as enumerated in `system/welcome.active_streams` and the
/// inspection API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Gateway-assigned identifier.
    pub stream_id: String,

    /// Holder of grant/revoke/transfer/close rights.
    pub owner: String,

    /// Participants permitted to publish frames; always includes the owner.
    pub authorized_writers: Vec<String>,

    /// Upload or download.
    pub direction: StreamDirection,

    /// Instant the stream was opened.
    pub created: DateTime<Utc>,

    /// Immutable explicit recipient list; empty means broadcast.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<String>,

    /// All metadata preserved from the opening request.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Payload of `stream/grant-write` and `stream/revoke-write`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteAuthorization {
    /// Stream the authorization applies to.
    pub stream_id: String,

    /// Participant being granted or revoked.
    pub participant_id: String,

    /// Optional operator note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `stream/write-granted` (gateway broadcast).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteGranted {
    /// Stream the grant applies to.
    pub stream_id: String,

    /// The newly authorized writer.
    pub participant_id: String,

    /// Full writer set after the change.
    pub authorized_writers: Vec<String>,
}

/// Payload of `stream/transfer-ownership`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOwnership {
    /// Stream being handed over.
    pub stream_id: String,

    /// Participant receiving ownership; must be in the space.
    pub new_owner: String,

    /// Optional operator note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `stream/ownership-transferred` (gateway broadcast).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipTransferred {
    /// Stream that changed hands.
    pub stream_id: String,

    /// Owner before the transfer. Remains an authorized writer unless
    /// separately revoked.
    pub previous_owner: String,

    /// Owner after the transfer.
    pub new_owner: String,

    /// Full writer set after the change.
    pub authorized_writers: Vec<String>,
}

/// Payload of `stream/close` in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamClose {
    /// Stream being closed.
    pub stream_id: String,

    /// Optional reason, set by the gateway on owner disconnect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_preserves_unknown_metadata() {
        let req: StreamRequest = serde_json::from_value(json!({
            "direction": "upload",
            "format": "pos/v1",
            "target": ["game-server"],
            "tick_rate": 30,
            "session": {"map": "arena"}
        }))
        .unwrap();
        assert_eq!(req.direction, StreamDirection::Upload);
        assert_eq!(req.metadata["tick_rate"], 30);
        assert_eq!(req.metadata["session"]["map"], "arena");

        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["tick_rate"], 30);
        assert_eq!(back["format"], "pos/v1");
    }

    #[test]
    fn request_without_target_is_broadcast() {
        let req: StreamRequest =
            serde_json::from_value(json!({"direction": "download"})).unwrap();
        assert!(req.target.is_empty());
        let back = serde_json::to_value(&req).unwrap();
        assert!(back.get("target").is_none());
    }

    #[test]
    fn stream_info_roundtrip_with_metadata() {
        let info: StreamInfo = serde_json::from_value(json!({
            "stream_id": "stream-1",
            "owner": "P1",
            "authorized_writers": ["P1"],
            "direction": "upload",
            "created": "2025-01-01T00:00:00Z",
            "target": ["game-server"],
            "format": "pos/v1"
        }))
        .unwrap();
        assert_eq!(info.stream_id, "stream-1");
        assert_eq!(info.metadata["format"], "pos/v1");
        let back = serde_json::to_value(&info).unwrap();
        assert_eq!(back["target"], json!(["game-server"]));
    }

    #[test]
    fn direction_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&StreamDirection::Upload).unwrap(),
            "\"upload\""
        );
        assert_eq!(
            serde_json::to_string(&StreamDirection::Download).unwrap(),
            "\"download\""
        );
    }
}
