//! Domain layer: sessions, the session registry, and change events.
//!
//! This module contains the server-side model of connected clients and
//! the row-change notifications that are fanned out to them.

pub mod change_event;
pub mod session;
pub mod session_id;
pub mod session_registry;

pub use change_event::{ChangeEvent, ChangeKind};
pub use session::{Session, SessionState};
pub use session_id::SessionId;
pub use session_registry::SessionRegistry;
