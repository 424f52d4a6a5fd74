//! Service layer: request dispatch and change fan-out.
//!
//! [`RequestDispatcher`] validates client requests and runs them against the
//! [`crate::backend::DataBackend`]. [`Broadcaster`] relays the change stream
//! to every session in the [`crate::domain::SessionRegistry`].

pub mod broadcaster;
pub mod dispatcher;

pub use broadcaster::Broadcaster;
pub use dispatcher::RequestDispatcher;
