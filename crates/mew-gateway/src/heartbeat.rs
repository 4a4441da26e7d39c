// SPDX-License-Identifier: MIT OR Apache-2.0
//! Heartbeat broadcast and dead-socket sweep.

use crate::AppState;
use crate::{router, streams};
use mew_core::{Envelope, kinds};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Spawn the periodic heartbeat task.
pub fn spawn(state: Arc<AppState>) -> JoinHandle<()> {
    let interval = Duration::from_millis(state.config.heartbeat_interval_ms.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so heartbeats start one
        // interval after boot.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    })
}

/// Broadcast one heartbeat to every space and drop dead connections.
pub async fn sweep(state: &AppState) {
    for space in state.registry.all().await {
        let mut guard = space.lock().await;

        let heartbeat = Envelope::system(kinds::SYSTEM_HEARTBEAT, json!({}));
        streams::broadcast(&guard, &heartbeat, None);

        let dead: Vec<String> = guard
            .participants
            .values()
            .filter(|p| !p.is_connected())
            .map(|p| p.id.clone())
            .collect();
        for id in dead {
            info!(space = %guard.name, participant = %id, "sweeping dead connection");
            router::force_disconnect(&mut guard, &state.audit, &id, None);
        }
    }
}
