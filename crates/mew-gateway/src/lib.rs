// SPDX-License-Identifier: MIT OR Apache-2.0
//! mew-gateway
#![deny(unsafe_code)]
//!
//! The MEW gateway: a WebSocket-fanout bus hosting isolated spaces. Each
//! space routes JSON envelopes between participants under fine-grained
//! capability patterns and mediates raw side-channel streams with
//! per-stream authorization.
//!
//! The library exposes [`build_app`] so tests and embedders can serve the
//! gateway on any listener; the `mew-gateway` binary wires it to a socket
//! with config loading and graceful shutdown.

pub mod api;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod router;
pub mod space;
pub mod streams;

use axum::Router;
use axum::routing::get;
use mew_audit::AuditLogs;
use mew_config::{GatewayConfig, SpacesConfig};
use space::SpaceRegistry;
use std::sync::Arc;
use std::time::Instant;

/// Shared gateway state.
pub struct AppState {
    /// Runtime settings.
    pub config: GatewayConfig,
    /// Declarative participant tables.
    pub spaces_config: SpacesConfig,
    /// All hosted spaces.
    pub registry: SpaceRegistry,
    /// The dual audit sinks.
    pub audit: AuditLogs,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Assemble gateway state from its configuration.
    #[must_use]
    pub fn new(config: GatewayConfig, spaces_config: SpacesConfig, audit: AuditLogs) -> Self {
        let registry = SpaceRegistry::new(config.max_spaces, config.max_history_size);
        Self {
            config,
            spaces_config,
            registry,
            audit,
            started_at: Instant::now(),
        }
    }
}

/// Build the Axum router with the WebSocket endpoint and the read-only
/// inspection API.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/spaces", get(api::list_spaces))
        .route("/spaces/{space}", get(connection::ws_handler))
        .route("/spaces/{space}/history", get(api::history))
        .route("/spaces/{space}/participants", get(api::participants))
        .route("/spaces/{space}/streams", get(api::streams))
        .layer(axum::middleware::from_fn(api::log_requests))
        .with_state(state)
}
