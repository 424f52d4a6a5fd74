//! Row-level change notifications relayed to clients.
//!
//! A [`ChangeEvent`] is produced by a [`crate::source::ChangeSource`] and
//! consumed exactly once by the [`crate::service::Broadcaster`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// Kind of row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A row was created.
    Insert,
    /// A row was modified.
    Update,
    /// A row was removed.
    Delete,
}

impl ChangeKind {
    /// Returns the wire name (`"INSERT"`, `"UPDATE"`, `"DELETE"`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(RelayError::Parse(format!("unknown change kind: {other}"))),
        }
    }
}

/// Immutable record of one row change in a watched collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// Table the change happened in.
    pub collection: String,
    /// Insert, update or delete.
    pub kind: ChangeKind,
    /// Row after the change (absent for deletes).
    pub new_state: Option<Value>,
    /// Row before the change (absent for inserts).
    pub old_state: Option<Value>,
    /// When the change was committed, or received if the source does not say.
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        collection: impl Into<String>,
        kind: ChangeKind,
        new_state: Option<Value>,
        old_state: Option<Value>,
    ) -> Self {
        Self {
            collection: collection.into(),
            kind,
            new_state,
            old_state,
            timestamp: Utc::now(),
        }
    }

    /// The row clients should treat as current: the new state, or the old
    /// state when the row was deleted.
    #[must_use]
    pub fn current_state(&self) -> Option<&Value> {
        self.new_state.as_ref().or(self.old_state.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("update".parse::<ChangeKind>().ok(), Some(ChangeKind::Update));
        assert_eq!("DELETE".parse::<ChangeKind>().ok(), Some(ChangeKind::Delete));
        assert!("TRUNCATE".parse::<ChangeKind>().is_err());
    }

    #[test]
    fn kind_serializes_uppercase() {
        let json = serde_json::to_string(&ChangeKind::Insert).unwrap_or_default();
        assert_eq!(json, "\"INSERT\"");
    }

    #[test]
    fn current_state_prefers_new_row() {
        let event = ChangeEvent::new(
            "vehicles",
            ChangeKind::Update,
            Some(json!({"id": 1, "speed": 20})),
            Some(json!({"id": 1, "speed": 10})),
        );
        assert_eq!(event.current_state(), Some(&json!({"id": 1, "speed": 20})));
    }

    #[test]
    fn current_state_falls_back_to_old_row_on_delete() {
        let event = ChangeEvent::new("vehicles", ChangeKind::Delete, None, Some(json!({"id": 7})));
        assert_eq!(event.current_state(), Some(&json!({"id": 7})));
    }
}
