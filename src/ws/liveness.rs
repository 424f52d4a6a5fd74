//! Periodic liveness sweep over all sessions.
//!
//! Each tick, a session that showed inbound activity since the previous
//! tick is in good standing; any other session accrues a missed window.
//! Sessions reaching the configured number of consecutive missed windows
//! are closed and deregistered. Sessions still in good standing are pinged
//! so that a healthy client always has something to answer.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::domain::{Session, SessionId, SessionRegistry};

/// Runs [`sweep`] every `interval` until `shutdown` fires.
pub async fn run_liveness(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    max_missed: u32,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_secs = interval.as_secs(), max_missed, "liveness sweeper started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let expired = sweep(&registry, max_missed).await;
                if !expired.is_empty() {
                    tracing::info!(terminated = expired.len(), "liveness sweep closed sessions");
                }
            }
        }
    }
    tracing::info!("liveness sweeper stopped");
}

/// One liveness pass. Returns the IDs of the sessions it terminated.
pub async fn sweep(registry: &SessionRegistry, max_missed: u32) -> Vec<SessionId> {
    let mut expired: Vec<Arc<Session>> = Vec::new();
    let _ = registry
        .for_each(|session| {
            if session.check_alive() {
                session.reset_missed_windows();
            } else if session.record_missed_window() >= max_missed {
                expired.push(Arc::clone(session));
                return;
            }
            if session.is_writable() {
                let _ = session.try_send(Message::Ping(Bytes::new()));
            }
        })
        .await;

    let mut terminated = Vec::with_capacity(expired.len());
    for session in expired {
        tracing::warn!(
            session_id = %session.id(),
            max_missed,
            "session missed liveness checks, terminating"
        );
        let _ = session.begin_close();
        let _ = registry.remove(session.id()).await;
        terminated.push(session.id());
    }
    terminated
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    async fn open_session(registry: &SessionRegistry) -> (Arc<Session>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(Session::new(tx, CancellationToken::new()));
        let _ = session.mark_open();
        let _ = registry.add(Arc::clone(&session)).await;
        (session, rx)
    }

    #[tokio::test]
    async fn silent_session_is_closed_after_two_missed_windows() {
        let registry = SessionRegistry::new();
        let (session, _rx) = open_session(&registry).await;

        assert!(sweep(&registry, 2).await.is_empty());
        assert!(sweep(&registry, 2).await.is_empty());
        assert_eq!(sweep(&registry, 2).await, vec![session.id()]);

        assert!(registry.get(session.id()).await.is_none());
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn active_session_survives() {
        let registry = SessionRegistry::new();
        let (session, _rx) = open_session(&registry).await;

        for _ in 0..5 {
            session.mark_alive();
            assert!(sweep(&registry, 2).await.is_empty());
        }
        assert!(registry.get(session.id()).await.is_some());
    }

    #[tokio::test]
    async fn activity_resets_missed_windows() {
        let registry = SessionRegistry::new();
        let (session, _rx) = open_session(&registry).await;

        let _ = sweep(&registry, 2).await;
        let _ = sweep(&registry, 2).await;
        session.mark_alive();
        let _ = sweep(&registry, 2).await;
        assert!(sweep(&registry, 2).await.is_empty());
        assert!(registry.get(session.id()).await.is_some());
    }

    #[tokio::test]
    async fn sessions_in_good_standing_are_pinged() {
        let registry = SessionRegistry::new();
        let (_session, mut rx) = open_session(&registry).await;

        let _ = sweep(&registry, 2).await;
        assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_liveness(
            registry,
            Duration::from_secs(30),
            2,
            shutdown.clone(),
        ));
        shutdown.cancel();
        assert!(task.await.is_ok());
    }
}
