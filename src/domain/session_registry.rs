//! Concurrent set of open sessions.
//!
//! [`SessionRegistry`] stores every registered session in a `HashMap`
//! behind a [`tokio::sync::RwLock`]. Broadcasts iterate under the read
//! lock with a synchronous visitor, so a concurrent `remove` waits until
//! the iteration has finished instead of invalidating it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Session, SessionId};
use crate::error::RelayError;

/// Central store for all open client sessions.
///
/// # Concurrency
///
/// - Any number of broadcasts may iterate concurrently.
/// - `add` and `remove` are serialized with iteration: a session removed
///   while a broadcast runs is removed once that broadcast has finished,
///   and is never visited by a later one.
/// - A session is visited at most once per `for_each` call.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a session.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Internal`] if a session with the same ID is
    /// already registered (should never happen with UUID v4).
    pub async fn add(&self, session: Arc<Session>) -> Result<SessionId, RelayError> {
        let id = session.id();
        let mut map = self.sessions.write().await;
        if map.contains_key(&id) {
            return Err(RelayError::Internal(format!(
                "session {id} already registered"
            )));
        }
        map.insert(id, session);
        Ok(id)
    }

    /// Deregisters a session, returning it if it was present.
    pub async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(&id)
    }

    /// Returns the session with the given ID, if registered.
    pub async fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).map(Arc::clone)
    }

    /// Calls `visit` once for every registered session.
    ///
    /// The visitor runs while the read lock is held and must not block.
    /// Returns the number of sessions visited.
    pub async fn for_each<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(&Arc<Session>),
    {
        let map = self.sessions.read().await;
        for session in map.values() {
            visit(session);
        }
        map.len()
    }

    /// Returns the number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
