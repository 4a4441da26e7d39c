// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and overlay for the MEW gateway.
//!
//! This crate provides [`GatewayConfig`] — the runtime settings — together
//! with the declarative per-space participant tables ([`SpacesConfig`]),
//! TOML loading, `MEW_*` environment overlays, and advisory
//! [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use mew_core::Capability;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found or unreadable.
    #[error("config file not readable: {path}: {reason}")]
    FileNotReadable {
        /// Path that was requested.
        path: String,
        /// Underlying IO error rendering.
        reason: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// An environment override carried an unparseable value.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvValue {
        /// The environment variable name.
        var: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The history ring is unusually large.
    LargeHistory {
        /// Configured entry count.
        entries: usize,
    },
    /// A very small heartbeat interval will be noisy.
    ShortHeartbeat {
        /// Configured interval in milliseconds.
        millis: u64,
    },
    /// A configured participant has no capabilities at all.
    ParticipantWithoutCapabilities {
        /// Space name.
        space: String,
        /// Participant identifier.
        participant: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargeHistory { entries } => {
                write!(f, "history ring of {entries} entries is unusually large")
            }
            ConfigWarning::ShortHeartbeat { millis } => {
                write!(f, "heartbeat interval of {millis}ms is unusually short")
            }
            ConfigWarning::ParticipantWithoutCapabilities { space, participant } => {
                write!(
                    f,
                    "participant '{participant}' in space '{space}' has no capabilities"
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// GatewayConfig
// ---------------------------------------------------------------------------

/// What to do when a participant ID connects while already connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Close the existing connection and attach the new one.
    EvictOld,
    /// Refuse the new connection.
    RejectNew,
}

/// Top-level runtime configuration for the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind host.
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Heartbeat broadcast and dead-socket sweep interval.
    pub heartbeat_interval_ms: u64,

    /// Maximum inbound WebSocket text frame size in bytes.
    pub max_message_size_bytes: usize,

    /// Maximum number of concurrently hosted spaces.
    pub max_spaces: usize,

    /// Maximum participants per space.
    pub max_clients_per_space: usize,

    /// Envelope history ring capacity per space.
    pub max_history_size: usize,

    /// Append accepted/failed envelopes to `envelope-history.jsonl`.
    pub envelope_history_enabled: bool,

    /// Append capability decisions to `capability-decisions.jsonl`.
    pub capability_decisions_enabled: bool,

    /// Master switch for gateway structured logging.
    pub gateway_logging_enabled: bool,

    /// Directory holding the JSONL audit logs.
    pub log_dir: String,

    /// Duplicate participant connect policy.
    pub on_duplicate_participant: DuplicatePolicy,

    /// Per-participant outbound queue depth; overflow disconnects the
    /// slow consumer.
    pub outbound_queue_depth: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            heartbeat_interval_ms: 30_000,
            max_message_size_bytes: 1024 * 1024,
            max_spaces: 100,
            max_clients_per_space: 50,
            max_history_size: 1000,
            envelope_history_enabled: true,
            capability_decisions_enabled: true,
            gateway_logging_enabled: true,
            log_dir: "./logs".to_string(),
            on_duplicate_participant: DuplicatePolicy::EvictOld,
            outbound_queue_depth: 256,
        }
    }
}

impl GatewayConfig {
    /// Parse from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::ParseError {
            reason: err.to_string(),
        })
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::FileNotReadable {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `MEW_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(std::env::vars())
    }

    /// Apply `MEW_*` overrides from an explicit variable iterator.
    ///
    /// Unknown `MEW_*` variables are ignored; malformed values are errors.
    pub fn apply_env_from(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), ConfigError> {
        for (key, value) in vars {
            match key.as_str() {
                "MEW_HOST" => self.host = value,
                "MEW_PORT" => self.port = parse(&key, &value)?,
                "MEW_HEARTBEAT_INTERVAL_MS" => self.heartbeat_interval_ms = parse(&key, &value)?,
                "MEW_MAX_MESSAGE_SIZE_BYTES" => self.max_message_size_bytes = parse(&key, &value)?,
                "MEW_MAX_SPACES" => self.max_spaces = parse(&key, &value)?,
                "MEW_MAX_CLIENTS_PER_SPACE" => self.max_clients_per_space = parse(&key, &value)?,
                "MEW_MAX_HISTORY_SIZE" => self.max_history_size = parse(&key, &value)?,
                "MEW_ENVELOPE_HISTORY_ENABLED" => {
                    self.envelope_history_enabled = parse_bool(&key, &value)?;
                }
                "MEW_CAPABILITY_DECISIONS_ENABLED" => {
                    self.capability_decisions_enabled = parse_bool(&key, &value)?;
                }
                "MEW_GATEWAY_LOGGING_ENABLED" => {
                    self.gateway_logging_enabled = parse_bool(&key, &value)?;
                }
                "MEW_LOG_DIR" => self.log_dir = value,
                "MEW_ON_DUPLICATE_PARTICIPANT" => {
                    self.on_duplicate_participant = match value.as_str() {
                        "evict-old" => DuplicatePolicy::EvictOld,
                        "reject-new" => DuplicatePolicy::RejectNew,
                        other => {
                            return Err(ConfigError::InvalidEnvValue {
                                var: key,
                                reason: format!("unknown policy {other:?}"),
                            });
                        }
                    };
                }
                "MEW_OUTBOUND_QUEUE_DEPTH" => self.outbound_queue_depth = parse(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Semantic validation; hard failures are errors, soft issues come back
    /// as warnings.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        if self.max_history_size == 0 {
            reasons.push("max_history_size must be at least 1".to_string());
        }
        if self.max_clients_per_space == 0 {
            reasons.push("max_clients_per_space must be at least 1".to_string());
        }
        if self.max_message_size_bytes == 0 {
            reasons.push("max_message_size_bytes must be at least 1".to_string());
        }
        if self.outbound_queue_depth == 0 {
            reasons.push("outbound_queue_depth must be at least 1".to_string());
        }
        if !reasons.is_empty() {
            return Err(ConfigError::ValidationError { reasons });
        }

        let mut warnings = Vec::new();
        if self.max_history_size > 100_000 {
            warnings.push(ConfigWarning::LargeHistory {
                entries: self.max_history_size,
            });
        }
        if self.heartbeat_interval_ms < 1000 {
            warnings.push(ConfigWarning::ShortHeartbeat {
                millis: self.heartbeat_interval_ms,
            });
        }
        Ok(warnings)
    }
}

fn parse<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|err| ConfigError::InvalidEnvValue {
        var: var.to_string(),
        reason: format!("{err}"),
    })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidEnvValue {
            var: var.to_string(),
            reason: format!("expected boolean, got {other:?}"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Space configuration
// ---------------------------------------------------------------------------

/// Declarative participant table for one space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceConfig {
    /// Participants keyed by ID.
    #[serde(default)]
    pub participants: BTreeMap<String, ParticipantConfig>,
}

/// A pre-registered participant: token binding plus capability grants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    /// Bearer token this identity must present, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Capability grants for this participant.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// All configured spaces, keyed by name. Spaces not listed here accept
/// unknown participants with the default capability set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpacesConfig {
    /// Space tables keyed by space name.
    #[serde(default)]
    pub spaces: BTreeMap<String, SpaceConfig>,
}

/// Outcome of binding a presented identity against the space tables.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityResolution {
    /// The participant is configured and the token (if any) matched.
    Known {
        /// The configured capability grants.
        capabilities: Vec<Capability>,
    },
    /// The participant is configured but presented the wrong token.
    TokenMismatch,
    /// The participant is not configured; default capabilities apply.
    Unknown,
}

impl SpacesConfig {
    /// Parse from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::ParseError {
            reason: err.to_string(),
        })
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::FileNotReadable {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Bind a presented `(participant, token)` pair within a space.
    #[must_use]
    pub fn resolve(
        &self,
        space: &str,
        participant: &str,
        token: Option<&str>,
    ) -> IdentityResolution {
        let Some(entry) = self
            .spaces
            .get(space)
            .and_then(|s| s.participants.get(participant))
        else {
            return IdentityResolution::Unknown;
        };
        if let Some(expected) = &entry.token
            && token != Some(expected.as_str())
        {
            return IdentityResolution::TokenMismatch;
        }
        IdentityResolution::Known {
            capabilities: entry.capabilities.clone(),
        }
    }

    /// Advisory warnings across all space tables.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut out = Vec::new();
        for (space, table) in &self.spaces {
            for (id, participant) in &table.participants {
                if participant.capabilities.is_empty() {
                    out.push(ConfigWarning::ParticipantWithoutCapabilities {
                        space: space.clone(),
                        participant: id.clone(),
                    });
                }
            }
        }
        out
    }
}

/// Capability set granted to participants absent from the space tables.
#[must_use]
pub fn default_capabilities() -> Vec<Capability> {
    vec![Capability::kind("chat")]
}
