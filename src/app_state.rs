//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backend::DataBackend;
use crate::config::RelayConfig;
use crate::domain::SessionRegistry;
use crate::service::RequestDispatcher;

/// Per-session queue sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Frames buffered for the writer before broadcasts start dropping.
    pub outbound_capacity: usize,
    /// Requests buffered behind the one in flight.
    pub request_queue: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            request_queue: 64,
        }
    }
}

impl From<&RelayConfig> for SessionLimits {
    fn from(config: &RelayConfig) -> Self {
        Self {
            outbound_capacity: config.session_outbound_capacity,
            request_queue: config.session_request_queue,
        }
    }
}

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Every open session.
    pub registry: Arc<SessionRegistry>,
    /// Runs client requests against the data backend.
    pub dispatcher: Arc<RequestDispatcher>,
    /// Root shutdown token; each session holds a child of it.
    pub shutdown: CancellationToken,
    /// Per-session queue sizes.
    pub limits: SessionLimits,
    /// Tracks every session task so shutdown can wait for them to close.
    pub sessions: TaskTracker,
}

impl AppState {
    /// Builds state with an empty registry.
    #[must_use]
    pub fn new(
        backend: Arc<dyn DataBackend>,
        limits: SessionLimits,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            dispatcher: Arc::new(RequestDispatcher::new(backend)),
            shutdown,
            limits,
            sessions: TaskTracker::new(),
        }
    }
}
