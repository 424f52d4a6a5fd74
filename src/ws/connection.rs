//! WebSocket session loop.
//!
//! Each connection runs three tasks tied together by the session's
//! cancellation token:
//!
//! - the reader (this function) classifies inbound frames and answers
//!   handshakes and parse errors immediately;
//! - the request worker runs queued requests one at a time, so replies
//!   leave in the order requests arrived;
//! - the writer drains the outbound queue into the socket, flushing what
//!   is left and sending a close frame once the session stops.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::messages::{ClientRequest, InboundMessage, OutboundMessage};
use crate::app_state::AppState;
use crate::domain::Session;
use crate::error::RelayError;
use crate::service::RequestDispatcher;

/// Runs one client session from accept to close.
pub async fn run_session(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.limits.outbound_capacity);
    let session = Arc::new(Session::new(outbound_tx, state.shutdown.child_token()));
    let session_id = session.id();

    let writer = tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&session)));

    if let Err(e) = state.registry.add(Arc::clone(&session)).await {
        tracing::error!(session_id = %session_id, error = %e, "failed to register session");
        let _ = session.begin_close();
        let _ = writer.await;
        session.mark_closed();
        return;
    }
    let _ = session.mark_open();
    tracing::info!(session_id = %session_id, "session opened");
    reply(&session, &OutboundMessage::welcome());

    let (request_tx, request_rx) = mpsc::channel(state.limits.request_queue);
    let worker = tokio::spawn(request_worker(
        Arc::clone(&session),
        Arc::clone(&state.dispatcher),
        request_rx,
    ));

    loop {
        tokio::select! {
            () = session.cancelled() => break,
            frame = stream.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "transport error");
                        break;
                    }
                    None => break,
                };
                session.mark_alive();
                match frame {
                    Message::Text(text) => handle_text(&session, &request_tx, text.as_str()),
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_text(&session, &request_tx, text),
                        Err(e) => {
                            let err = RelayError::Parse(format!("binary frame is not UTF-8: {e}"));
                            reply(&session, &OutboundMessage::error(&err, None));
                        }
                    },
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    let _ = session.begin_close();
    let _ = state.registry.remove(session_id).await;
    drop(request_tx);
    let _ = worker.await;
    let _ = writer.await;
    session.mark_closed();
    let age = Utc::now() - session.connected_at();
    tracing::info!(
        session_id = %session_id,
        age_secs = age.num_seconds(),
        dropped_frames = session.dropped_frames(),
        "session closed"
    );
}

/// Classifies one text frame and queues or answers it.
fn handle_text(session: &Session, requests: &mpsc::Sender<ClientRequest>, text: &str) {
    match InboundMessage::parse(text) {
        Ok(InboundMessage::Request(request)) => {
            let (request, reason) = match requests.try_send(request) {
                Ok(()) => return,
                Err(TrySendError::Full(request)) => (request, "request queue full"),
                Err(TrySendError::Closed(request)) => (request, "request worker stopped"),
            };
            tracing::warn!(
                session_id = %session.id(),
                table = %request.table,
                reason,
                "request rejected"
            );
            let err = RelayError::Transport(reason.to_string());
            reply(session, &OutboundMessage::error(&err, request.operation_id));
        }
        Ok(InboundMessage::Handshake { operation_id }) => {
            reply(session, &OutboundMessage::ack(operation_id));
        }
        Err(err) => {
            tracing::debug!(session_id = %session.id(), error = %err, "unparseable message");
            reply(session, &OutboundMessage::error(&err, None));
        }
    }
}

/// Queues a reply without waiting for queue capacity.
fn reply(session: &Session, message: &OutboundMessage) {
    match message.to_frame() {
        Ok(frame) => {
            if !session.try_send(frame) {
                tracing::warn!(session_id = %session.id(), "outbound queue full, reply dropped");
            }
        }
        Err(e) => tracing::error!(session_id = %session.id(), error = %e, "failed to encode reply"),
    }
}

/// Runs queued requests in arrival order until the session stops.
///
/// Cancellation drops the request in flight along with everything still
/// queued.
async fn request_worker(
    session: Arc<Session>,
    dispatcher: Arc<RequestDispatcher>,
    mut requests: mpsc::Receiver<ClientRequest>,
) {
    loop {
        let request = tokio::select! {
            biased;
            () = session.cancelled() => break,
            next = requests.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };
        let ClientRequest {
            operation,
            table,
            operation_id,
            data,
        } = request;

        let result = tokio::select! {
            biased;
            () = session.cancelled() => {
                tracing::debug!(
                    session_id = %session.id(),
                    %operation,
                    %table,
                    "in-flight request cancelled"
                );
                break;
            }
            result = dispatcher.execute(&operation, &table, data) => result,
        };

        match &result {
            Ok(_) => tracing::debug!(
                session_id = %session.id(),
                %operation,
                %table,
                "request completed"
            ),
            Err(e) => tracing::warn!(
                session_id = %session.id(),
                %operation,
                %table,
                error_code = e.error_code(),
                error = %e,
                "request failed"
            ),
        }

        let frame = match OutboundMessage::from_result(result, operation_id).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(session_id = %session.id(), error = %e, "failed to encode reply");
                continue;
            }
        };
        if session.send(frame).await.is_err() {
            break;
        }
    }
}

/// Drains the outbound queue into the socket.
///
/// On cancellation, frames already queued are still written, then a close
/// frame is sent.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Message>,
    session: Arc<Session>,
) {
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        tracing::debug!(session_id = %session.id(), error = %e, "write failed");
                        let _ = session.begin_close();
                        return;
                    }
                }
                None => break,
            },
            () = session.cancelled() => break,
        }
    }

    outbound.close();
    while let Ok(frame) = outbound.try_recv() {
        if sink.send(frame).await.is_err() {
            return;
        }
    }
    let close = Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: "session closed".into(),
    }));
    let _ = sink.send(close).await;
    let _ = sink.close().await;
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    use super::*;

    const REQUEST: &str = r#"{"operation":"select","table":"items","operationId":"r1"}"#;

    fn next_reply(outbound: &mut mpsc::Receiver<Message>) -> Value {
        let Ok(Message::Text(text)) = outbound.try_recv() else {
            panic!("expected a queued text reply");
        };
        let Ok(value) = serde_json::from_str(text.as_str()) else {
            panic!("reply should be JSON");
        };
        value
    }

    #[test]
    fn request_is_queued_for_the_worker() {
        let (tx, mut outbound) = mpsc::channel(4);
        let session = Session::new(tx, CancellationToken::new());
        let (requests, mut queued) = mpsc::channel(1);

        handle_text(&session, &requests, REQUEST);

        let Ok(request) = queued.try_recv() else {
            panic!("request should be queued");
        };
        assert_eq!(request.table, "items");
        assert!(outbound.try_recv().is_err());
    }

    #[test]
    fn full_request_queue_is_reported() {
        let (tx, mut outbound) = mpsc::channel(4);
        let session = Session::new(tx, CancellationToken::new());
        let (requests, _queued) = mpsc::channel(1);

        handle_text(&session, &requests, REQUEST);
        handle_text(&session, &requests, REQUEST);

        let reply = next_reply(&mut outbound);
        assert_eq!(reply["errorCode"], "TRANSPORT_ERROR");
        assert_eq!(reply["operationId"], "r1");
        let Some(message) = reply["error"].as_str() else {
            panic!("error message should be a string");
        };
        assert!(message.contains("request queue full"), "{message}");
    }

    #[test]
    fn stopped_worker_is_not_reported_as_full_queue() {
        let (tx, mut outbound) = mpsc::channel(4);
        let session = Session::new(tx, CancellationToken::new());
        let (requests, queued) = mpsc::channel(1);
        drop(queued);

        handle_text(&session, &requests, REQUEST);

        let reply = next_reply(&mut outbound);
        assert_eq!(reply["errorCode"], "TRANSPORT_ERROR");
        let Some(message) = reply["error"].as_str() else {
            panic!("error message should be a string");
        };
        assert!(message.contains("request worker stopped"), "{message}");
        assert!(!message.contains("queue full"), "{message}");
    }
}
