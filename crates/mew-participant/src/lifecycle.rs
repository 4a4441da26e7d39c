// SPDX-License-Identifier: MIT OR Apache-2.0
//! The participant lifecycle state machine.
//!
//! Pause is enforced here, not at the gateway: a paused participant refuses
//! to initiate envelopes outside a narrow allow-list until the pause expires
//! or a resume arrives. The same module answers status requests and the
//! forget/clear/restart/shutdown controls, and raises the proactive
//! near-limit notice.

use mew_core::system::{ParticipantStatus, StatusReport};
use mew_core::{Envelope, kinds};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Kinds a paused participant may still send, besides all `system/*`.
pub const PAUSE_ALLOW_LIST: &[&str] = &[
    kinds::PARTICIPANT_STATUS,
    kinds::PARTICIPANT_RESUME,
    kinds::PARTICIPANT_REQUEST_STATUS,
    kinds::CHAT_ACKNOWLEDGE,
    kinds::CHAT_CANCEL,
    "reasoning/cancel",
    kinds::PARTICIPANT_CLEAR,
    kinds::PARTICIPANT_FORGET,
    kinds::PARTICIPANT_SHUTDOWN,
];

/// Fraction of the token ceiling that triggers the near-limit notice.
const NEAR_LIMIT_THRESHOLD: f64 = 0.9;

/// Minimum spacing between near-limit notices.
const NEAR_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// An active pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseState {
    /// ID of the `participant/pause` envelope that caused it.
    pub origin_envelope: String,

    /// Optional operator-supplied reason.
    pub reason: Option<String>,

    /// When the pause auto-expires; `None` pauses until an explicit resume.
    pub expires_at: Option<Instant>,
}

/// What [`ParticipantState::handle_control`] decided.
#[derive(Debug, Default)]
pub struct ControlOutcome {
    /// Envelopes to send in order (status replies and broadcasts).
    pub replies: Vec<Envelope>,

    /// The participant should disconnect after sending the replies.
    pub disconnect: bool,
}

/// Mutable lifecycle state of one participant.
#[derive(Debug)]
pub struct ParticipantState {
    id: String,
    pause: Option<PauseState>,

    /// Advisory token usage.
    pub context_tokens: u64,

    /// Advisory message count.
    pub context_messages: u64,

    /// Advisory token ceiling used for near-limit detection.
    pub context_max_tokens: u64,

    last_near_limit: Option<Instant>,
}

impl ParticipantState {
    /// Fresh state for the given identity.
    #[must_use]
    pub fn new(id: impl Into<String>, context_max_tokens: u64) -> Self {
        Self {
            id: id.into(),
            pause: None,
            context_tokens: 0,
            context_messages: 0,
            context_max_tokens,
            last_near_limit: None,
        }
    }

    /// The identity this state belongs to.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current pause, if any (after expiry processing).
    #[must_use]
    pub fn pause(&self) -> Option<&PauseState> {
        self.pause.as_ref()
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ParticipantStatus {
        if self.pause.is_some() {
            ParticipantStatus::Paused
        } else {
            ParticipantStatus::Active
        }
    }

    /// Whether an envelope of `kind` may be initiated at `now`.
    ///
    /// Expires the pause as a side effect when its deadline has passed.
    pub fn may_send(&mut self, kind: &str, now: Instant) -> bool {
        if let Some(pause) = &self.pause
            && let Some(expires_at) = pause.expires_at
            && now >= expires_at
        {
            self.pause = None;
        }
        if self.pause.is_none() {
            return true;
        }
        kinds::is_system(kind) || PAUSE_ALLOW_LIST.contains(&kind)
    }

    /// Record advisory context usage.
    pub fn record_usage(&mut self, tokens: u64, messages: u64) {
        self.context_tokens += tokens;
        self.context_messages += messages;
    }

    /// Build a status report filtered to `fields` (when given). `status` and
    /// `messages_in_context` are always included.
    #[must_use]
    pub fn status_report(&self, fields: Option<&[String]>) -> StatusReport {
        let wants = |name: &str| fields.is_none_or(|fs| fs.iter().any(|f| f == name));
        StatusReport {
            status: self.status(),
            messages_in_context: self.context_messages,
            tokens: wants("tokens").then_some(self.context_tokens),
            max_tokens: wants("max_tokens").then_some(self.context_max_tokens),
        }
    }

    /// Emit the proactive near-limit notice when usage crossed the
    /// threshold and the cooldown has elapsed.
    #[must_use]
    pub fn near_limit_notice(&mut self, now: Instant) -> Option<Envelope> {
        if self.context_max_tokens == 0 {
            return None;
        }
        let threshold = (self.context_max_tokens as f64 * NEAR_LIMIT_THRESHOLD) as u64;
        if self.context_tokens < threshold {
            return None;
        }
        if let Some(last) = self.last_near_limit
            && now.duration_since(last) < NEAR_LIMIT_COOLDOWN
        {
            return None;
        }
        self.last_near_limit = Some(now);
        let report = StatusReport {
            status: ParticipantStatus::NearLimit,
            messages_in_context: self.context_messages,
            tokens: Some(self.context_tokens),
            max_tokens: Some(self.context_max_tokens),
        };
        Some(self.status_envelope(&report))
    }

    /// React to a directed lifecycle control envelope.
    pub fn handle_control(&mut self, envelope: &Envelope, now: Instant) -> ControlOutcome {
        match envelope.kind.as_str() {
            kinds::PARTICIPANT_PAUSE => self.on_pause(envelope, now),
            kinds::PARTICIPANT_RESUME => self.on_resume(envelope),
            kinds::PARTICIPANT_REQUEST_STATUS => self.on_request_status(envelope),
            kinds::PARTICIPANT_FORGET => self.on_forget(envelope),
            kinds::PARTICIPANT_CLEAR => self.on_clear(envelope),
            kinds::PARTICIPANT_RESTART => self.on_restart(envelope),
            kinds::PARTICIPANT_SHUTDOWN => self.on_shutdown(envelope),
            _ => ControlOutcome::default(),
        }
    }

    fn on_pause(&mut self, envelope: &Envelope, now: Instant) -> ControlOutcome {
        let timeout = envelope.payload["timeout_seconds"].as_u64();
        let reason = envelope.payload["reason"].as_str().map(str::to_string);
        self.pause = Some(PauseState {
            origin_envelope: envelope.id.clone(),
            reason,
            expires_at: timeout.map(|secs| now + Duration::from_secs(secs)),
        });
        let report = self.status_report(None);
        ControlOutcome {
            replies: vec![self.status_envelope(&report)],
            disconnect: false,
        }
    }

    fn on_resume(&mut self, _envelope: &Envelope) -> ControlOutcome {
        self.pause = None;
        let report = self.status_report(None);
        ControlOutcome {
            replies: vec![self.status_envelope(&report)],
            disconnect: false,
        }
    }

    fn on_request_status(&mut self, envelope: &Envelope) -> ControlOutcome {
        let fields: Option<Vec<String>> = envelope.payload["fields"]
            .as_array()
            .map(|xs| {
                xs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            });
        let report = self.status_report(fields.as_deref());
        let reply = self
            .status_envelope(&report)
            .to([envelope.from.clone()])
            .correlate([envelope.id.clone()]);
        ControlOutcome {
            replies: vec![reply],
            disconnect: false,
        }
    }

    fn on_forget(&mut self, envelope: &Envelope) -> ControlOutcome {
        let entries = envelope.payload["entries"].as_u64().unwrap_or(0);
        self.context_messages = self.context_messages.saturating_sub(entries);

        let compacting = StatusReport {
            status: ParticipantStatus::Compacting,
            messages_in_context: self.context_messages,
            tokens: Some(self.context_tokens),
            max_tokens: Some(self.context_max_tokens),
        };
        let compacted = StatusReport {
            status: ParticipantStatus::Compacted,
            ..compacting.clone()
        };
        ControlOutcome {
            replies: vec![
                self.reply_to(envelope, &compacting),
                self.reply_to(envelope, &compacted),
            ],
            disconnect: false,
        }
    }

    fn on_clear(&mut self, envelope: &Envelope) -> ControlOutcome {
        self.context_tokens = 0;
        self.context_messages = 0;
        let report = StatusReport {
            status: ParticipantStatus::Cleared,
            messages_in_context: 0,
            tokens: Some(0),
            max_tokens: Some(self.context_max_tokens),
        };
        ControlOutcome {
            replies: vec![self.reply_to(envelope, &report)],
            disconnect: false,
        }
    }

    fn on_restart(&mut self, envelope: &Envelope) -> ControlOutcome {
        self.context_tokens = 0;
        self.context_messages = 0;
        self.pause = None;
        self.last_near_limit = None;
        let report = StatusReport {
            status: ParticipantStatus::Restarted,
            messages_in_context: 0,
            tokens: Some(0),
            max_tokens: Some(self.context_max_tokens),
        };
        ControlOutcome {
            replies: vec![self.reply_to(envelope, &report)],
            disconnect: false,
        }
    }

    fn on_shutdown(&mut self, envelope: &Envelope) -> ControlOutcome {
        let report = StatusReport {
            status: ParticipantStatus::ShuttingDown,
            messages_in_context: self.context_messages,
            tokens: Some(self.context_tokens),
            max_tokens: Some(self.context_max_tokens),
        };
        ControlOutcome {
            replies: vec![self.reply_to(envelope, &report)],
            disconnect: true,
        }
    }

    fn status_envelope(&self, report: &StatusReport) -> Envelope {
        Envelope::new(
            &self.id,
            kinds::PARTICIPANT_STATUS,
            serde_json::to_value(report).unwrap_or(Value::Null),
        )
    }

    fn reply_to(&self, envelope: &Envelope, report: &StatusReport) -> Envelope {
        self.status_envelope(report)
            .to([envelope.from.clone()])
            .correlate([envelope.id.clone()])
    }
}
