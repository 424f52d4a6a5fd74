//! One connected client and its lifecycle.
//!
//! A [`Session`] is shared between the [`super::SessionRegistry`] (which
//! pushes broadcast frames into it) and the connection task that owns the
//! socket. All mutable state is atomic so both sides can use it without a
//! lock.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::SessionId;
use crate::error::RelayError;

/// Lifecycle of a session: `Connecting → Open → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Upgrade completed, not yet registered.
    Connecting = 0,
    /// Registered and receiving broadcasts.
    Open = 1,
    /// Deregistering; no longer a broadcast target.
    Closing = 2,
    /// Socket released.
    Closed = 3,
}

impl SessionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// A connected client.
///
/// Frames are queued on a bounded channel drained by the connection's
/// writer task. The cancellation token is the single "stop" signal for
/// every task that belongs to the session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    outbound: mpsc::Sender<Message>,
    state: AtomicU8,
    alive: AtomicBool,
    missed_windows: AtomicU32,
    dropped_frames: AtomicU64,
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session in the `Connecting` state.
    ///
    /// `cancel` is usually a child of the server shutdown token so that
    /// shutdown closes every session.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Message>, cancel: CancellationToken) -> Self {
        Self {
            id: SessionId::new(),
            outbound,
            state: AtomicU8::new(SessionState::Connecting as u8),
            alive: AtomicBool::new(true),
            missed_windows: AtomicU32::new(0),
            dropped_frames: AtomicU64::new(0),
            cancel,
            connected_at: Utc::now(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// When the upgrade completed.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves `Connecting → Open`. Returns `false` if the session was
    /// already past `Connecting`.
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves the session to `Closing` and cancels its tasks.
    ///
    /// Idempotent. Returns `true` only for the call that performed the
    /// transition.
    pub fn begin_close(&self) -> bool {
        let transitioned = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (raw < SessionState::Closing as u8).then_some(SessionState::Closing as u8)
            })
            .is_ok();
        self.cancel.cancel();
        transitioned
    }

    /// Marks the socket as released.
    pub fn mark_closed(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
        self.cancel.cancel();
    }

    /// `true` while the session is `Open` and its writer is still draining.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.state() == SessionState::Open && !self.outbound.is_closed()
    }

    /// Resolves once the session has been told to stop.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// `true` once the session has been told to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Queues a frame without waiting.
    ///
    /// Returns `false` (and counts a dropped frame) if the queue is full or
    /// the writer is gone. Never suspends, so it is safe to call while the
    /// registry is being iterated.
    pub fn try_send(&self, frame: Message) -> bool {
        if self.outbound.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Queues a frame, waiting for queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] if the writer task has exited.
    pub async fn send(&self, frame: Message) -> Result<(), RelayError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| RelayError::Transport(format!("session {} writer closed", self.id)))
    }

    /// Number of frames dropped because the queue was full or closed.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Records inbound activity from the client.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Reads and clears the alive flag.
    ///
    /// Returns `true` if the client showed activity since the last check.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Counts one more missed liveness window and returns the new total.
    pub fn record_missed_window(&self) -> u32 {
        self.missed_windows
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    /// Clears the missed-window counter.
    pub fn reset_missed_windows(&self) {
        self.missed_windows.store(0, Ordering::Relaxed);
    }
}
