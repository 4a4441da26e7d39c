// SPDX-License-Identifier: MIT OR Apache-2.0
//! Non-blocking JSON-Lines sinks.

use crate::{CAPABILITY_DECISIONS_FILE, ENVELOPE_HISTORY_FILE};
use crate::entry::{CapabilityDecisionEntry, EnvelopeHistoryEntry};
use serde::Serialize;
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Queue depth between the routing path and the writer task.
const SINK_QUEUE_DEPTH: usize = 1024;

enum SinkMessage {
    Line(String),
    Sync(oneshot::Sender<()>),
}

/// An append-only JSONL file behind a bounded channel and a writer task.
///
/// Appends never block: when the queue is full the line is dropped with a
/// warning rather than stalling the per-space writer.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl std::fmt::Debug for SinkMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line(_) => f.write_str("Line"),
            Self::Sync(_) => f.write_str("Sync"),
        }
    }
}

impl JsonlSink {
    /// Open (append/create) the file and spawn its writer task.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        let (tx, mut rx) = mpsc::channel::<SinkMessage>(SINK_QUEUE_DEPTH);
        let path_display = path.display().to_string();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    SinkMessage::Line(mut line) => {
                        line.push('\n');
                        if let Err(err) = file.write_all(line.as_bytes()).await {
                            warn!(path = %path_display, error = %err, "audit append failed");
                        }
                    }
                    SinkMessage::Sync(ack) => {
                        if let Err(err) = file.flush().await {
                            warn!(path = %path_display, error = %err, "audit flush failed");
                        }
                        let _ = ack.send(());
                    }
                }
            }
        });

        Ok(Self { tx })
    }

    /// Enqueue one record. Drops (with a warning) when the queue is full or
    /// the writer task is gone.
    pub fn append<T: Serialize>(&self, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "audit record serialization failed");
                return;
            }
        };
        if self.tx.try_send(SinkMessage::Line(line)).is_err() {
            warn!("audit queue full; record dropped");
        }
    }

    /// Wait until every previously enqueued record is on disk.
    pub async fn sync(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SinkMessage::Sync(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

// ---------------------------------------------------------------------------
// AuditLogs
// ---------------------------------------------------------------------------

/// The gateway's pair of audit sinks, each individually disableable.
#[derive(Debug, Clone, Default)]
pub struct AuditLogs {
    envelope_history: Option<JsonlSink>,
    capability_decisions: Option<JsonlSink>,
}

impl AuditLogs {
    /// Open the enabled sinks under `log_dir`.
    pub async fn open(
        log_dir: &Path,
        envelope_history_enabled: bool,
        capability_decisions_enabled: bool,
    ) -> std::io::Result<Self> {
        let envelope_history = if envelope_history_enabled {
            Some(JsonlSink::open(&log_dir.join(ENVELOPE_HISTORY_FILE)).await?)
        } else {
            None
        };
        let capability_decisions = if capability_decisions_enabled {
            Some(JsonlSink::open(&log_dir.join(CAPABILITY_DECISIONS_FILE)).await?)
        } else {
            None
        };
        Ok(Self {
            envelope_history,
            capability_decisions,
        })
    }

    /// Both sinks disabled; useful in tests.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Append to the envelope-history log, if enabled.
    pub fn record_history(&self, entry: &EnvelopeHistoryEntry) {
        if let Some(sink) = &self.envelope_history {
            sink.append(entry);
        }
    }

    /// Append to the capability-decision log, if enabled.
    pub fn record_decision(&self, entry: &CapabilityDecisionEntry) {
        if let Some(sink) = &self.capability_decisions {
            sink.append(entry);
        }
    }

    /// Flush both sinks to disk.
    pub async fn sync(&self) {
        if let Some(sink) = &self.envelope_history {
            sink.sync().await;
        }
        if let Some(sink) = &self.capability_decisions {
            sink.sync().await;
        }
    }
}
