// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-space mutable state: participant table, history ring, streams.
//!
//! Every [`Space`] sits behind one `tokio::sync::Mutex` — the single-writer
//! discipline. All envelope processing for a space runs under that lock in
//! arrival order; fan-out only enqueues to per-participant channels and
//! never waits on a socket.

use chrono::{DateTime, Utc};
use mew_capability::CapabilitySet;
use mew_core::stream::{StreamDirection, StreamInfo, StreamRequest};
use mew_core::system::ParticipantInfo;
use mew_core::Envelope;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A message queued for one connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame (serialized envelope or raw stream frame).
    Text(String),
    /// Close the socket with the given code.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Result of enqueueing to a participant's outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The message was handed to the writer task.
    Delivered,
    /// The bounded queue was full; the consumer is too slow.
    Overflow,
    /// The writer task is gone (socket already closed).
    Disconnected,
}

// ---------------------------------------------------------------------------
// HistoryRing
// ---------------------------------------------------------------------------

/// Bounded FIFO of accepted envelopes with a duplicate-ID guard.
#[derive(Debug)]
pub struct HistoryRing {
    entries: VecDeque<Envelope>,
    ids: HashSet<String>,
    capacity: usize,
}

impl HistoryRing {
    /// Create a ring holding at most `capacity` envelopes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            ids: HashSet::new(),
            capacity,
        }
    }

    /// Whether `id` appears in the retained window.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Append an accepted envelope, evicting the oldest at capacity.
    pub fn push(&mut self, envelope: Envelope) {
        if self.entries.len() == self.capacity
            && let Some(evicted) = self.entries.pop_front()
        {
            self.ids.remove(&evicted.id);
        }
        self.ids.insert(envelope.id.clone());
        self.entries.push_back(envelope);
    }

    /// Number of retained envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entries, newest first, optionally starting strictly
    /// after (older than) the envelope `before`.
    #[must_use]
    pub fn page(&self, before: Option<&str>, limit: usize) -> Vec<Envelope> {
        let newest_first = self.entries.iter().rev();
        let skipped: Vec<&Envelope> = match before {
            Some(marker) => newest_first
                .skip_while(|e| e.id != marker)
                .skip(1)
                .collect(),
            None => newest_first.collect(),
        };
        skipped.into_iter().take(limit).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// ParticipantEntry
// ---------------------------------------------------------------------------

/// A connected participant within a space.
#[derive(Debug)]
pub struct ParticipantEntry {
    /// Participant identifier, unique per space.
    pub id: String,

    /// Connection instance identifier, used to disambiguate evictions.
    pub connection_id: String,

    /// The participant's compiled grants.
    pub capabilities: CapabilitySet,

    /// Handle to the connection's writer task.
    pub sender: mpsc::Sender<Outbound>,

    /// Sub-context stack of correlation IDs.
    pub context_stack: Vec<String>,

    /// Join instant.
    pub joined_at: DateTime<Utc>,
}

/// Upper bound on the sub-context stack; the oldest frame is dropped beyond
/// this.
pub const CONTEXT_STACK_LIMIT: usize = 64;

impl ParticipantEntry {
    /// Snapshot for welcome/presence payloads.
    #[must_use]
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id.clone(),
            capabilities: self.capabilities.grants(),
        }
    }

    /// Whether the connection's writer task is still alive.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Enqueue a text frame without waiting.
    pub fn enqueue(&self, text: String) -> EnqueueOutcome {
        match self.sender.try_send(Outbound::Text(text)) {
            Ok(()) => EnqueueOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Overflow,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Disconnected,
        }
    }

    /// Ask the writer task to close the socket.
    pub fn request_close(&self, code: u16, reason: &str) {
        let _ = self.sender.try_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Apply a context-stack push, capped at [`CONTEXT_STACK_LIMIT`].
    pub fn push_context(&mut self, correlation_id: String) {
        if self.context_stack.len() == CONTEXT_STACK_LIMIT {
            self.context_stack.remove(0);
        }
        self.context_stack.push(correlation_id);
    }

    /// Apply a context-stack pop.
    pub fn pop_context(&mut self) -> Option<String> {
        self.context_stack.pop()
    }

    /// Move `correlation_id` to the top of the stack, when present.
    pub fn resume_context(&mut self, correlation_id: &str) {
        if let Some(pos) = self.context_stack.iter().position(|c| c == correlation_id) {
            let frame = self.context_stack.remove(pos);
            self.context_stack.push(frame);
        }
    }
}

// ---------------------------------------------------------------------------
// StreamEntry
// ---------------------------------------------------------------------------

/// A live stream and its authorization state.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    /// Gateway-assigned identifier.
    pub stream_id: String,

    /// Holder of grant/revoke/transfer/close rights.
    pub owner: String,

    /// Ordered writer set; the owner is always a member.
    pub authorized_writers: Vec<String>,

    /// Immutable explicit recipient list; empty means broadcast.
    pub target: Vec<String>,

    /// Upload or download.
    pub direction: StreamDirection,

    /// All metadata preserved verbatim from the opening request.
    pub metadata: Map<String, Value>,

    /// Open instant.
    pub created_at: DateTime<Utc>,

    /// ID of the `stream/request` envelope that opened this stream.
    pub request_id: String,
}

impl StreamEntry {
    /// Build a stream from its opening request, preserving every metadata
    /// field.
    #[must_use]
    pub fn from_request(
        stream_id: String,
        owner: String,
        request_id: String,
        request: &StreamRequest,
    ) -> Self {
        let mut metadata = request.metadata.clone();
        if let Some(content_type) = &request.content_type {
            metadata.insert("content_type".into(), Value::String(content_type.clone()));
        }
        if let Some(format) = &request.format {
            metadata.insert("format".into(), Value::String(format.clone()));
        }
        if let Some(size) = request.expected_size_bytes {
            metadata.insert("expected_size_bytes".into(), Value::from(size));
        }
        if let Some(description) = &request.description {
            metadata.insert("description".into(), Value::String(description.clone()));
        }
        Self {
            stream_id,
            authorized_writers: vec![owner.clone()],
            owner,
            target: request.target.clone(),
            direction: request.direction,
            metadata,
            created_at: Utc::now(),
            request_id,
        }
    }

    /// Whether `participant` may publish frames.
    #[must_use]
    pub fn is_writer(&self, participant: &str) -> bool {
        self.authorized_writers.iter().any(|w| w == participant)
    }

    /// Add a writer; idempotent.
    pub fn grant_writer(&mut self, participant: &str) {
        if !self.is_writer(participant) {
            self.authorized_writers.push(participant.to_string());
        }
    }

    /// Remove a writer; idempotent. Returns `true` when something changed.
    pub fn revoke_writer(&mut self, participant: &str) -> bool {
        let before = self.authorized_writers.len();
        self.authorized_writers.retain(|w| w != participant);
        self.authorized_writers.len() != before
    }

    /// Snapshot for welcome payloads and the inspection API.
    #[must_use]
    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            stream_id: self.stream_id.clone(),
            owner: self.owner.clone(),
            authorized_writers: self.authorized_writers.clone(),
            direction: self.direction,
            created: self.created_at,
            target: self.target.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Space
// ---------------------------------------------------------------------------

/// An isolated broadcast bus.
#[derive(Debug)]
pub struct Space {
    /// Space name.
    pub name: String,

    /// Connected participants keyed by ID (ordered for deterministic
    /// fan-out).
    pub participants: BTreeMap<String, ParticipantEntry>,

    /// Accepted-envelope ring.
    pub history: HistoryRing,

    /// Live streams keyed by stream ID.
    pub streams: BTreeMap<String, StreamEntry>,

    stream_counter: u64,

    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl Space {
    /// Create an empty space with the given history capacity.
    #[must_use]
    pub fn new(name: impl Into<String>, max_history: usize) -> Self {
        Self {
            name: name.into(),
            participants: BTreeMap::new(),
            history: HistoryRing::new(max_history),
            streams: BTreeMap::new(),
            stream_counter: 0,
            created_at: Utc::now(),
        }
    }

    /// Allocate the next monotonic stream ID (`stream-1`, `stream-2`, …).
    pub fn next_stream_id(&mut self) -> String {
        self.stream_counter += 1;
        format!("stream-{}", self.stream_counter)
    }

    /// Snapshot of every participant.
    #[must_use]
    pub fn participant_infos(&self) -> Vec<ParticipantInfo> {
        self.participants.values().map(ParticipantEntry::info).collect()
    }

    /// Snapshot of every live stream.
    #[must_use]
    pub fn stream_infos(&self) -> Vec<StreamInfo> {
        self.streams.values().map(StreamEntry::info).collect()
    }
}

// ---------------------------------------------------------------------------
// SpaceRegistry
// ---------------------------------------------------------------------------

/// The gateway refused to host another space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("space limit reached")]
pub struct SpaceLimitReached;

/// All spaces hosted by this gateway.
#[derive(Debug)]
pub struct SpaceRegistry {
    spaces: RwLock<HashMap<String, Arc<Mutex<Space>>>>,
    max_spaces: usize,
    max_history: usize,
}

impl SpaceRegistry {
    /// Create a registry enforcing the given caps.
    #[must_use]
    pub fn new(max_spaces: usize, max_history: usize) -> Self {
        Self {
            spaces: RwLock::new(HashMap::new()),
            max_spaces,
            max_history,
        }
    }

    /// Fetch a space, creating it when absent and below the cap.
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<Mutex<Space>>, SpaceLimitReached> {
        if let Some(space) = self.spaces.read().await.get(name) {
            return Ok(Arc::clone(space));
        }
        let mut spaces = self.spaces.write().await;
        if let Some(space) = spaces.get(name) {
            return Ok(Arc::clone(space));
        }
        if spaces.len() >= self.max_spaces {
            return Err(SpaceLimitReached);
        }
        let space = Arc::new(Mutex::new(Space::new(name, self.max_history)));
        spaces.insert(name.to_string(), Arc::clone(&space));
        Ok(space)
    }

    /// Fetch an existing space.
    pub async fn get(&self, name: &str) -> Option<Arc<Mutex<Space>>> {
        self.spaces.read().await.get(name).map(Arc::clone)
    }

    /// Names of all hosted spaces, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.spaces.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every hosted space.
    pub async fn all(&self) -> Vec<Arc<Mutex<Space>>> {
        self.spaces.read().await.values().map(Arc::clone).collect()
    }
}
