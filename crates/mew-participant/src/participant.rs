// SPDX-License-Identifier: MIT OR Apache-2.0
//! A participant: a [`Client`] composed with the lifecycle state machine
//! and the proposal tracker.

use crate::client::{Client, ClientError, ClientEvent};
use crate::lifecycle::ParticipantState;
use crate::proposals::{ProposalTracker, ProposalUpdate};
use mew_core::Envelope;
use mew_protocol::StreamFrame;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Why an outbound envelope was not sent.
#[derive(Debug, Error)]
pub enum SendError {
    /// The participant is paused and the kind is outside the allow-list.
    #[error("paused; refusing to send {kind:?}")]
    Paused {
        /// The refused kind.
        kind: String,
    },

    /// The underlying client failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Something the application should see.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An inbound envelope (control replies have already been sent).
    Envelope(Box<Envelope>),
    /// A raw stream data frame.
    Frame(StreamFrame),
    /// A `participant/shutdown` was honored; the caller should drop the
    /// participant.
    ShuttingDown,
}

/// A connected participant.
pub struct Participant {
    client: Client,
    state: ParticipantState,
    proposals: ProposalTracker,
}

impl Participant {
    /// Connect and join `space` under the given identity.
    pub async fn connect(
        base_url: &str,
        space: &str,
        participant: &str,
        token: Option<&str>,
        context_max_tokens: u64,
    ) -> Result<Self, ClientError> {
        let client = Client::connect(base_url, space, participant, token).await?;
        Ok(Self {
            state: ParticipantState::new(participant, context_max_tokens),
            proposals: ProposalTracker::default(),
            client,
        })
    }

    /// The bound identity.
    #[must_use]
    pub fn id(&self) -> &str {
        self.client.id()
    }

    /// Lifecycle state (counters, pause).
    #[must_use]
    pub fn state(&self) -> &ParticipantState {
        &self.state
    }

    /// Mutable lifecycle state, e.g. to record context usage.
    pub fn state_mut(&mut self) -> &mut ParticipantState {
        &mut self.state
    }

    /// The proposal index.
    #[must_use]
    pub fn proposals(&self) -> &ProposalTracker {
        &self.proposals
    }

    /// Build and send an envelope, honoring the pause state machine.
    pub async fn send(
        &mut self,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Envelope, SendError> {
        let envelope = self.client.envelope(kind, payload);
        self.send_envelope(envelope).await
    }

    /// Send a prepared envelope (with `to`/`correlation_id` set), honoring
    /// the pause state machine.
    pub async fn send_envelope(&mut self, envelope: Envelope) -> Result<Envelope, SendError> {
        if !self.state.may_send(&envelope.kind, Instant::now()) {
            return Err(SendError::Paused {
                kind: envelope.kind,
            });
        }
        self.proposals.observe(&envelope, Instant::now());
        self.client.send(&envelope).await?;
        Ok(envelope)
    }

    /// Send a raw stream data frame.
    pub async fn send_frame(&mut self, stream_id: &str, data: &str) -> Result<(), ClientError> {
        self.client.send_frame(stream_id, data).await
    }

    /// Receive the next event, transparently answering lifecycle controls
    /// and tracking proposal correlation. Returns `None` when the gateway
    /// closed the connection.
    pub async fn next(&mut self) -> Result<Option<Event>, ClientError> {
        let Some(event) = self.client.recv().await? else {
            return Ok(None);
        };
        match event {
            ClientEvent::Frame(frame) => Ok(Some(Event::Frame(frame))),
            ClientEvent::Envelope(envelope) => {
                let now = Instant::now();
                if let Some(update) = self.proposals.observe(&envelope, now) {
                    if let ProposalUpdate::WithdrawalIgnored { proposal_id, from } = &update {
                        debug!(
                            proposal = %proposal_id,
                            from = %from,
                            "discarded unauthorized withdrawal"
                        );
                    }
                }

                let addressed_to_me = envelope.to.iter().any(|id| id == self.id());
                if addressed_to_me && envelope.kind.starts_with("participant/") {
                    let outcome = self.state.handle_control(&envelope, now);
                    for reply in outcome.replies {
                        // Replies are on the pause allow-list by
                        // construction; send them directly.
                        self.client.send(&reply).await?;
                    }
                    if outcome.disconnect {
                        return Ok(Some(Event::ShuttingDown));
                    }
                }
                Ok(Some(Event::Envelope(envelope)))
            }
        }
    }

    /// Periodic upkeep: emit a near-limit notice when due and expire stale
    /// proposals.
    pub async fn maintain(&mut self) -> Result<(), ClientError> {
        let now = Instant::now();
        for proposal_id in self.proposals.expire(now) {
            debug!(proposal = %proposal_id, "proposal timed out");
        }
        if let Some(notice) = self.state.near_limit_notice(now) {
            self.client.send(&notice).await?;
        }
        Ok(())
    }

    /// Close the connection.
    pub async fn close(self) {
        self.client.close().await;
    }
}
