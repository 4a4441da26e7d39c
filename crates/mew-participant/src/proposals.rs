// SPDX-License-Identifier: MIT OR Apache-2.0
//! Proposal / fulfillment / response correlation.
//!
//! A proposal is an ordinary `mcp/proposal` envelope; its fulfillment is an
//! `mcp/request` carrying the proposal ID at `correlation_id[0]`, and the
//! `mcp/response` to that request closes the chain. Withdrawals are only
//! honored from the original proposer — a withdrawal from anyone else is
//! ignored, which keeps an under-privileged peer from cancelling someone
//! else's pending work.

use mew_core::{Envelope, kinds};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Lifecycle phase of a tracked proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalPhase {
    /// Waiting for a fulfillment, rejection, or withdrawal.
    Pending,
    /// An `mcp/request` referenced the proposal.
    Fulfilled {
        /// ID of the fulfilling request envelope.
        request_id: String,
        /// Who executed the proposal.
        fulfiller: String,
    },
    /// The fulfillment's `mcp/response` arrived.
    Responded {
        /// ID of the fulfilling request envelope.
        request_id: String,
        /// ID of the response envelope.
        response_id: String,
    },
    /// An addressee declined.
    Rejected {
        /// Who rejected.
        by: String,
    },
    /// The proposer retracted it.
    Withdrawn,
    /// The advisory deadline passed without a terminal event.
    TimedOut,
}

impl ProposalPhase {
    /// Whether the proposal reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Responded { .. } | Self::Rejected { .. } | Self::Withdrawn | Self::TimedOut
        )
    }
}

/// One tracked proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalRecord {
    /// Envelope ID of the proposal.
    pub proposal_id: String,

    /// The participant that sent it; the only identity allowed to withdraw.
    pub proposer: String,

    /// The proposal's addressees.
    pub to: Vec<String>,

    /// Current phase.
    pub phase: ProposalPhase,

    /// Advisory deadline.
    pub deadline: Instant,
}

/// What changed after observing one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalUpdate {
    /// A new proposal is now tracked.
    Created {
        /// The proposal ID.
        proposal_id: String,
    },
    /// A fulfillment was linked.
    Fulfilled {
        /// The proposal ID.
        proposal_id: String,
        /// The fulfilling request ID.
        request_id: String,
    },
    /// The response closed the chain.
    Responded {
        /// The proposal ID.
        proposal_id: String,
    },
    /// An addressee rejected.
    Rejected {
        /// The proposal ID.
        proposal_id: String,
        /// Who rejected.
        by: String,
    },
    /// The proposer withdrew.
    Withdrawn {
        /// The proposal ID.
        proposal_id: String,
    },
    /// A withdrawal from a non-proposer was discarded.
    WithdrawalIgnored {
        /// The proposal ID.
        proposal_id: String,
        /// The identity that tried to withdraw.
        from: String,
    },
}

/// Index of in-flight proposals, keyed by proposal ID.
#[derive(Debug)]
pub struct ProposalTracker {
    records: HashMap<String, ProposalRecord>,
    /// request_id → proposal_id, for response correlation.
    fulfillments: HashMap<String, String>,
    timeout: Duration,
}

/// Default advisory proposal timeout.
pub const DEFAULT_PROPOSAL_TIMEOUT: Duration = Duration::from_secs(300);

impl Default for ProposalTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PROPOSAL_TIMEOUT)
    }
}

impl ProposalTracker {
    /// Create a tracker with the given advisory timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            records: HashMap::new(),
            fulfillments: HashMap::new(),
            timeout,
        }
    }

    /// Look up a tracked proposal.
    #[must_use]
    pub fn get(&self, proposal_id: &str) -> Option<&ProposalRecord> {
        self.records.get(proposal_id)
    }

    /// Number of proposals not yet terminal.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| !r.phase.is_terminal())
            .count()
    }

    /// Observe one envelope (sent or received) and update the index.
    pub fn observe(&mut self, envelope: &Envelope, now: Instant) -> Option<ProposalUpdate> {
        match envelope.kind.as_str() {
            kinds::MCP_PROPOSAL => self.on_proposal(envelope, now),
            kinds::MCP_REQUEST => self.on_request(envelope),
            kinds::MCP_RESPONSE => self.on_response(envelope),
            kinds::MCP_REJECT => self.on_reject(envelope),
            kinds::MCP_WITHDRAW => self.on_withdraw(envelope),
            _ => None,
        }
    }

    fn on_proposal(&mut self, envelope: &Envelope, now: Instant) -> Option<ProposalUpdate> {
        self.records.insert(
            envelope.id.clone(),
            ProposalRecord {
                proposal_id: envelope.id.clone(),
                proposer: envelope.from.clone(),
                to: envelope.to.clone(),
                phase: ProposalPhase::Pending,
                deadline: now + self.timeout,
            },
        );
        Some(ProposalUpdate::Created {
            proposal_id: envelope.id.clone(),
        })
    }

    fn on_request(&mut self, envelope: &Envelope) -> Option<ProposalUpdate> {
        let proposal_id = envelope.correlation_id.first()?;
        let record = self.records.get_mut(proposal_id)?;
        if record.phase != ProposalPhase::Pending {
            return None;
        }
        record.phase = ProposalPhase::Fulfilled {
            request_id: envelope.id.clone(),
            fulfiller: envelope.from.clone(),
        };
        self.fulfillments
            .insert(envelope.id.clone(), proposal_id.clone());
        Some(ProposalUpdate::Fulfilled {
            proposal_id: proposal_id.clone(),
            request_id: envelope.id.clone(),
        })
    }

    fn on_response(&mut self, envelope: &Envelope) -> Option<ProposalUpdate> {
        let request_id = envelope.correlation_id.first()?;
        let proposal_id = self.fulfillments.get(request_id)?.clone();
        let record = self.records.get_mut(&proposal_id)?;
        if let ProposalPhase::Fulfilled { request_id, .. } = record.phase.clone() {
            record.phase = ProposalPhase::Responded {
                request_id,
                response_id: envelope.id.clone(),
            };
            return Some(ProposalUpdate::Responded { proposal_id });
        }
        None
    }

    fn on_reject(&mut self, envelope: &Envelope) -> Option<ProposalUpdate> {
        let proposal_id = envelope.correlation_id.first()?;
        let record = self.records.get_mut(proposal_id)?;
        if record.phase.is_terminal() {
            return None;
        }
        record.phase = ProposalPhase::Rejected {
            by: envelope.from.clone(),
        };
        Some(ProposalUpdate::Rejected {
            proposal_id: proposal_id.clone(),
            by: envelope.from.clone(),
        })
    }

    fn on_withdraw(&mut self, envelope: &Envelope) -> Option<ProposalUpdate> {
        let proposal_id = envelope.correlation_id.first()?;
        let record = self.records.get_mut(proposal_id)?;
        if envelope.from != record.proposer {
            warn!(
                proposal = %proposal_id,
                from = %envelope.from,
                proposer = %record.proposer,
                "withdrawal from non-proposer ignored"
            );
            return Some(ProposalUpdate::WithdrawalIgnored {
                proposal_id: proposal_id.clone(),
                from: envelope.from.clone(),
            });
        }
        if record.phase.is_terminal() {
            return None;
        }
        record.phase = ProposalPhase::Withdrawn;
        Some(ProposalUpdate::Withdrawn {
            proposal_id: proposal_id.clone(),
        })
    }

    /// Mark pending proposals past their deadline as timed out, returning
    /// their IDs.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        for record in self.records.values_mut() {
            if record.phase == ProposalPhase::Pending && now >= record.deadline {
                record.phase = ProposalPhase::TimedOut;
                expired.push(record.proposal_id.clone());
            }
        }
        expired
    }

    /// Drop terminal records and their fulfillment links.
    pub fn gc(&mut self) {
        self.records.retain(|_, r| !r.phase.is_terminal());
        let live: std::collections::HashSet<&String> = self.records.keys().collect();
        self.fulfillments.retain(|_, proposal| live.contains(proposal));
    }
}
