//! WebSocket layer: session loop, wire messages, liveness.
//!
//! Clients connect on `/` or `/ws`. Every connection becomes a
//! [`crate::domain::Session`] registered for change broadcasts and able to
//! issue data requests over the same socket.

pub mod connection;
pub mod handler;
pub mod liveness;
pub mod messages;
