// SPDX-License-Identifier: MIT OR Apache-2.0
//! WebSocket connection lifecycle: upgrade, identity binding, attach,
//! read/write loops, disconnect cleanup.

use crate::router::{self, Disposition};
use crate::space::{Outbound, ParticipantEntry, Space};
use crate::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use mew_capability::CapabilitySet;
use mew_config::{DuplicatePolicy, IdentityResolution};
use mew_core::system::{Presence, PresenceEvent, Welcome};
use mew_core::{Capability, Envelope, kinds};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Query parameters accepted on the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Participant identity to bind.
    pub participant: Option<String>,
    /// Bearer token, when the space config requires one.
    pub token: Option<String>,
}

/// Extract the presented identity from query parameters or headers.
/// Query parameters win; headers are the fallback for clients that cannot
/// set a query string.
fn presented_identity(
    params: &ConnectParams,
    headers: &HeaderMap,
) -> (Option<String>, Option<String>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let participant = params
        .participant
        .clone()
        .or_else(|| header("x-mew-participant"));
    let token = params.token.clone().or_else(|| {
        header("authorization")
            .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string))
            .or_else(|| header("x-mew-token"))
    });
    (participant, token)
}

/// `GET /spaces/{space}` — upgrade to the space's envelope bus.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(space_name): Path<String>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let (participant_id, token) = presented_identity(&params, &headers);
    let Some(participant_id) = participant_id else {
        return (StatusCode::BAD_REQUEST, "missing participant identity").into_response();
    };

    let capabilities =
        match state
            .spaces_config
            .resolve(&space_name, &participant_id, token.as_deref())
        {
            IdentityResolution::Known { capabilities } => capabilities,
            IdentityResolution::TokenMismatch => {
                warn!(space = %space_name, participant = %participant_id, "token mismatch");
                return (StatusCode::FORBIDDEN, "token mismatch").into_response();
            }
            IdentityResolution::Unknown => mew_config::default_capabilities(),
        };

    let space = match state.registry.get_or_create(&space_name).await {
        Ok(space) => space,
        Err(_) => {
            return (StatusCode::SERVICE_UNAVAILABLE, "space limit reached").into_response();
        }
    };

    ws.on_upgrade(move |socket| {
        handle_socket(state, space, space_name, participant_id, capabilities, socket)
    })
}

async fn handle_socket(
    state: Arc<AppState>,
    space: Arc<Mutex<Space>>,
    space_name: String,
    participant_id: String,
    capabilities: Vec<Capability>,
    socket: WebSocket,
) {
    let connection_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<Outbound>(state.config.outbound_queue_depth);

    // -- attach (welcome before peers observe the join) ----------------------
    {
        let mut guard = space.lock().await;

        let already_connected = guard.participants.contains_key(&participant_id);
        if !already_connected && guard.participants.len() >= state.config.max_clients_per_space {
            drop(guard);
            close_socket(socket, 1008, "space at capacity").await;
            return;
        }
        if already_connected {
            match state.config.on_duplicate_participant {
                DuplicatePolicy::EvictOld => {
                    info!(
                        space = %space_name,
                        participant = %participant_id,
                        "evicting previous connection"
                    );
                    router::force_disconnect(
                        &mut guard,
                        &state.audit,
                        &participant_id,
                        Some((1008, "superseded by a new connection")),
                    );
                }
                DuplicatePolicy::RejectNew => {
                    drop(guard);
                    close_socket(socket, 1008, "participant already connected").await;
                    return;
                }
            }
        }

        let entry = ParticipantEntry {
            id: participant_id.clone(),
            connection_id: connection_id.clone(),
            capabilities: CapabilitySet::compile(&capabilities),
            sender: tx.clone(),
            context_stack: Vec::new(),
            joined_at: chrono::Utc::now(),
        };
        let you = entry.info();

        let welcome = Envelope::system(
            kinds::SYSTEM_WELCOME,
            serde_json::to_value(Welcome {
                you: you.clone(),
                participants: guard.participant_infos(),
                active_streams: guard.stream_infos(),
            })
            .unwrap_or(Value::Null),
        )
        .to([participant_id.clone()]);

        guard.participants.insert(participant_id.clone(), entry);
        if let Some(me) = guard.participants.get(&participant_id) {
            let _ = me.enqueue(mew_protocol::encode(&welcome));
        }

        let join = Envelope::system(
            kinds::SYSTEM_PRESENCE,
            serde_json::to_value(Presence {
                event: PresenceEvent::Join,
                participant: you,
            })
            .unwrap_or(Value::Null),
        );
        crate::streams::broadcast(&guard, &join, Some(&participant_id));

        info!(
            space = %space_name,
            participant = %participant_id,
            connection = %connection_id,
            "participant joined"
        );
    }

    // -- writer task ---------------------------------------------------------
    let (mut ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(async move {
        let mut rx = rx;
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // -- read loop -----------------------------------------------------------
    loop {
        let message = match ws_rx.next().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                warn!(
                    space = %space_name,
                    participant = %participant_id,
                    error = %err,
                    "websocket read error"
                );
                break;
            }
            None => break,
        };
        match message {
            Message::Text(text) => {
                let disposition = router::handle_text(
                    &state,
                    &space,
                    &participant_id,
                    &connection_id,
                    text.as_str(),
                )
                .await;
                if let Disposition::Close { code } = disposition {
                    let _ = tx.try_send(Outbound::Close {
                        code,
                        reason: "protocol violation".to_string(),
                    });
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) => {
                debug!(
                    space = %space_name,
                    participant = %participant_id,
                    "binary frame ignored"
                );
            }
            // Ping/pong are handled at the protocol layer.
            _ => {}
        }
    }

    // -- cleanup -------------------------------------------------------------
    {
        let mut guard = space.lock().await;
        let still_ours = guard
            .participants
            .get(&participant_id)
            .is_some_and(|entry| entry.connection_id == connection_id);
        if still_ours {
            router::force_disconnect(&mut guard, &state.audit, &participant_id, None);
            info!(
                space = %space_name,
                participant = %participant_id,
                "participant left"
            );
        }
    }
    drop(tx);
    let _ = writer.await;
}

async fn close_socket(mut socket: WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn params(participant: Option<&str>, token: Option<&str>) -> ConnectParams {
        ConnectParams {
            participant: participant.map(str::to_string),
            token: token.map(str::to_string),
        }
    }

    #[test]
    fn query_parameters_win_over_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-mew-participant", HeaderValue::from_static("header-id"));
        let (id, token) = presented_identity(&params(Some("query-id"), None), &headers);
        assert_eq!(id.as_deref(), Some("query-id"));
        assert!(token.is_none());
    }

    #[test]
    fn header_fallback_for_identity_and_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-mew-participant", HeaderValue::from_static("agent-7"));
        headers.insert("authorization", HeaderValue::from_static("Bearer tok-1"));
        let (id, token) = presented_identity(&params(None, None), &headers);
        assert_eq!(id.as_deref(), Some("agent-7"));
        assert_eq!(token.as_deref(), Some("tok-1"));
    }

    #[test]
    fn mew_token_header_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-mew-token", HeaderValue::from_static("tok-2"));
        let (_, token) = presented_identity(&params(Some("a"), None), &headers);
        assert_eq!(token.as_deref(), Some("tok-2"));
    }

    #[test]
    fn missing_identity_is_none() {
        let (id, _) = presented_identity(&params(None, None), &HeaderMap::new());
        assert!(id.is_none());
    }
}
