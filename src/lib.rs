// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace umbrella for MEW (Multi-Entity Workspace).
//!
//! The functionality lives in the member crates under `crates/`:
//!
//! - `mew-core` — contract types (envelopes, kinds, streams, presence)
//! - `mew-protocol` — wire codec and inbound validation
//! - `mew-capability` — capability pattern compilation and matching
//! - `mew-config` — gateway and space configuration
//! - `mew-audit` — envelope-history and capability-decision JSONL logs
//! - `mew-gateway` — the WebSocket gateway itself (library + binary)
//! - `mew-participant` — participant-side SDK
//!
//! This package only hosts the workspace-level end-to-end test suites.
