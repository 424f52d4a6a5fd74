//! # tablecast
//!
//! Real-time relay between a PostgreSQL database and WebSocket clients.
//!
//! Row changes on watched tables are fanned out to every connected client,
//! and clients can issue insert, update, delete and select requests over
//! the same socket. The relay never interprets data itself: PostgreSQL owns
//! every row and every rule.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── WS session loop (ws/)          ── RequestDispatcher (service/)
//!     ├── Health / API docs (api/)                 │
//!     │                                            ▼
//!     ├── SessionRegistry (domain/)          DataBackend (backend/)
//!     │         ▲                                  │
//!     │         │                                  ▼
//!     └── Broadcaster (service/) ◄── ChangeSource (source/) ◄── PostgreSQL
//! ```

pub mod api;
pub mod app_state;
pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod source;
pub mod ws;
