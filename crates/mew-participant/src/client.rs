// SPDX-License-Identifier: MIT OR Apache-2.0
//! Minimal gateway client: connect, send, receive.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use mew_core::Envelope;
use mew_protocol::{DecodeError, Inbound, StreamFrame, decode_text};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The WebSocket connection could not be established.
    #[error("connect failed: {reason}")]
    Connect {
        /// Underlying error rendering.
        reason: String,
    },

    /// The transport failed mid-session.
    #[error("transport error: {reason}")]
    Transport {
        /// Underlying error rendering.
        reason: String,
    },
}

/// Something received from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A JSON envelope.
    Envelope(Box<Envelope>),
    /// A raw stream data frame.
    Frame(StreamFrame),
}

/// A connected gateway client bound to one participant identity.
pub struct Client {
    sink: WsSink,
    stream: WsStream,
    participant_id: String,
}

impl Client {
    /// Connect to `base_url` (e.g. `ws://127.0.0.1:8765`) and join `space`
    /// as `participant`.
    pub async fn connect(
        base_url: &str,
        space: &str,
        participant: &str,
        token: Option<&str>,
    ) -> Result<Self, ClientError> {
        let mut url = format!("{base_url}/spaces/{space}?participant={participant}");
        if let Some(token) = token {
            url.push_str(&format!("&token={token}"));
        }
        let (socket, _response) =
            tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|err| ClientError::Connect {
                    reason: err.to_string(),
                })?;
        let (sink, stream) = socket.split();
        Ok(Self {
            sink,
            stream,
            participant_id: participant.to_string(),
        })
    }

    /// The identity this client is bound to.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.participant_id
    }

    /// Build an envelope originating from this client.
    #[must_use]
    pub fn envelope(&self, kind: impl Into<String>, payload: serde_json::Value) -> Envelope {
        Envelope::new(&self.participant_id, kind, payload)
    }

    /// Send one envelope.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), ClientError> {
        self.send_text(mew_protocol::encode(envelope)).await
    }

    /// Send one raw stream data frame.
    pub async fn send_frame(&mut self, stream_id: &str, data: &str) -> Result<(), ClientError> {
        self.send_text(StreamFrame::new(stream_id, data).to_wire())
            .await
    }

    async fn send_text(&mut self, text: String) -> Result<(), ClientError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| ClientError::Transport {
                reason: err.to_string(),
            })
    }

    /// Receive the next envelope or frame. Returns `None` when the gateway
    /// closed the connection.
    pub async fn recv(&mut self) -> Result<Option<ClientEvent>, ClientError> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(err)) => {
                    return Err(ClientError::Transport {
                        reason: err.to_string(),
                    });
                }
                None => return Ok(None),
            };
            match message {
                Message::Text(text) => match decode_text(text.as_str()) {
                    Ok(Inbound::Envelope(envelope)) => {
                        return Ok(Some(ClientEvent::Envelope(envelope)));
                    }
                    Ok(Inbound::Frame(frame)) => return Ok(Some(ClientEvent::Frame(frame))),
                    Err(DecodeError::Parse { reason }) => {
                        warn!(%reason, "undecodable text from gateway; skipped");
                    }
                    Err(DecodeError::MalformedFrame) => {
                        warn!("malformed stream frame from gateway; skipped");
                    }
                },
                Message::Close(_) => return Ok(None),
                // Binary frames are not part of the protocol; pings are
                // answered by the library.
                _ => {}
            }
        }
    }

    /// Close the connection.
    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}
