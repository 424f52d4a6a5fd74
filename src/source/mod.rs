//! Change source: the upstream feed of row-level change notifications.
//!
//! The relay consumes only [`ChangeSource::subscribe`]. The returned
//! [`ChangeStream`] owns the upstream subscription, so dropping it tears
//! the subscription down.

pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::domain::ChangeEvent;
use crate::error::RelayError;

pub use postgres::PgChangeSource;

/// Stream of change events for the subscribed collections.
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Subscription capability of the upstream change feed.
#[async_trait]
pub trait ChangeSource: Send + Sync + fmt::Debug {
    /// Subscribes to insert, update and delete events on `collections`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Backend`] if the subscription cannot be
    /// established.
    async fn subscribe(&self, collections: &[String]) -> Result<ChangeStream, RelayError>;
}
