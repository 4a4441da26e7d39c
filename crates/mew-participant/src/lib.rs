// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-participant
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Participant-side SDK for MEW, built by composition: a [`Client`] exposes
//! a minimal send/receive API over the gateway WebSocket; a [`Participant`]
//! holds a `Client` plus the lifecycle state machine (pause allow-list,
//! context counters, status replies) and a [`ProposalTracker`] for the
//! proposal/fulfillment/response pattern.

pub mod client;
pub mod lifecycle;
pub mod participant;
pub mod proposals;

pub use client::{Client, ClientError, ClientEvent};
pub use lifecycle::{ControlOutcome, ParticipantState, PauseState};
pub use participant::{Event, Participant, SendError};
pub use proposals::{ProposalPhase, ProposalRecord, ProposalTracker, ProposalUpdate};
