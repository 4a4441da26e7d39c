// SPDX-License-Identifier: MIT OR Apache-2.0
//! Well-known message kinds.
//!
//! Kinds are hierarchical dotted/slash paths. The constants here cover the
//! core set the gateway and SDK interpret; anything else (e.g. `reasoning/*`)
//! is routed opaquely.

/// Directed greeting to a newly joined participant.
pub const SYSTEM_WELCOME: &str = "system/welcome";
/// Broadcast on join, leave, or capability update.
pub const SYSTEM_PRESENCE: &str = "system/presence";
/// Directed error report from the gateway.
pub const SYSTEM_ERROR: &str = "system/error";
/// Periodic liveness broadcast; bypasses capability checks.
pub const SYSTEM_HEARTBEAT: &str = "system/heartbeat";
/// Participant request to merge additional capabilities into its own set.
pub const SYSTEM_REGISTER: &str = "system/register";

/// Plain conversational message.
pub const CHAT: &str = "chat";
/// Acknowledge receipt of a chat message.
pub const CHAT_ACKNOWLEDGE: &str = "chat/acknowledge";
/// Cancel an in-flight chat exchange.
pub const CHAT_CANCEL: &str = "chat/cancel";

/// Direct MCP operation request.
pub const MCP_REQUEST: &str = "mcp/request";
/// Response to an MCP request.
pub const MCP_RESPONSE: &str = "mcp/response";
/// Suggested operation for a privileged peer to execute.
pub const MCP_PROPOSAL: &str = "mcp/proposal";
/// Proposer retracts a pending proposal.
pub const MCP_WITHDRAW: &str = "mcp/withdraw";
/// Addressee declines a proposal.
pub const MCP_REJECT: &str = "mcp/reject";

/// Ask the gateway to open a stream.
pub const STREAM_REQUEST: &str = "stream/request";
/// Gateway announcement that a stream is open.
pub const STREAM_OPEN: &str = "stream/open";
/// Close a stream (owner only) or gateway close broadcast.
pub const STREAM_CLOSE: &str = "stream/close";
/// Owner grants write access on a stream.
pub const STREAM_GRANT_WRITE: &str = "stream/grant-write";
/// Owner revokes write access on a stream.
pub const STREAM_REVOKE_WRITE: &str = "stream/revoke-write";
/// Owner hands the stream to a new owner.
pub const STREAM_TRANSFER_OWNERSHIP: &str = "stream/transfer-ownership";
/// Gateway acknowledgement of a write grant.
pub const STREAM_WRITE_GRANTED: &str = "stream/write-granted";
/// Gateway acknowledgement of an ownership transfer.
pub const STREAM_OWNERSHIP_TRANSFERRED: &str = "stream/ownership-transferred";

/// Ask a participant to pause.
pub const PARTICIPANT_PAUSE: &str = "participant/pause";
/// Ask a paused participant to resume.
pub const PARTICIPANT_RESUME: &str = "participant/resume";
/// Ask a participant to report its status.
pub const PARTICIPANT_REQUEST_STATUS: &str = "participant/request-status";
/// Participant status report.
pub const PARTICIPANT_STATUS: &str = "participant/status";
/// Ask a participant to trim its local context.
pub const PARTICIPANT_FORGET: &str = "participant/forget";
/// Ask a participant to zero its context counters.
pub const PARTICIPANT_CLEAR: &str = "participant/clear";
/// Ask a participant to re-initialize.
pub const PARTICIPANT_RESTART: &str = "participant/restart";
/// Ask a participant to shut down.
pub const PARTICIPANT_SHUTDOWN: &str = "participant/shutdown";

/// Returns `true` for `system/*` kinds.
#[must_use]
pub fn is_system(kind: &str) -> bool {
    kind.starts_with("system/")
}

/// Returns `true` for the stream-state mutation kinds the gateway interprets
/// (everything under `stream/` except the gateway-originated announcements).
#[must_use]
pub fn is_stream_control(kind: &str) -> bool {
    matches!(
        kind,
        STREAM_REQUEST | STREAM_CLOSE | STREAM_GRANT_WRITE | STREAM_REVOKE_WRITE
            | STREAM_TRANSFER_OWNERSHIP
    )
}
