//! Fan-out of change events to every open session.

use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::domain::{ChangeEvent, SessionRegistry};
use crate::source::ChangeStream;
use crate::ws::messages::OutboundMessage;

/// Pushes each [`ChangeEvent`] to every writable session.
///
/// The frame is serialized once per event and shared by all recipients.
/// Sends never wait: a session whose queue is full misses the event.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
}

impl Broadcaster {
    /// Creates a broadcaster over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Sends `event` to every writable session and returns how many
    /// sessions accepted it.
    pub async fn broadcast(&self, event: &ChangeEvent) -> usize {
        let frame: Utf8Bytes = match OutboundMessage::db_change(event).to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(
                    table = %event.collection,
                    error = %e,
                    "dropping unencodable change event"
                );
                return 0;
            }
        };

        let mut delivered = 0usize;
        let mut skipped = 0usize;
        let _ = self
            .registry
            .for_each(|session| {
                if session.is_writable() && session.try_send(Message::Text(frame.clone())) {
                    delivered += 1;
                } else {
                    skipped += 1;
                    tracing::debug!(
                        session_id = %session.id(),
                        "session not writable, skipping broadcast"
                    );
                }
            })
            .await;

        if skipped > 0 {
            tracing::warn!(
                table = %event.collection,
                event = %event.kind,
                recipients = delivered,
                skipped,
                "broadcast skipped sessions"
            );
        } else {
            tracing::debug!(
                table = %event.collection,
                event = %event.kind,
                recipients = delivered,
                "change broadcast"
            );
        }
        delivered
    }

    /// Relays `changes` until the stream ends or `shutdown` fires.
    ///
    /// Drops the stream on return, which ends the upstream subscription.
    pub async fn run(self, mut changes: ChangeStream, shutdown: CancellationToken) {
        tracing::info!("broadcaster started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                next = changes.next() => match next {
                    Some(event) => {
                        let _ = self.broadcast(&event).await;
                    }
                    None => {
                        tracing::warn!("change stream ended");
                        break;
                    }
                },
            }
        }
        drop(changes);
        tracing::info!("broadcaster stopped");
    }
}
