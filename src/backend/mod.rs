//! Data backend: the upstream service that owns the rows.
//!
//! The relay never interprets data itself. A [`DataBackend`] receives a
//! validated [`BackendOperation`] for one table and returns an
//! [`OperationOutcome`] or a [`RelayError::Backend`] carrying the
//! backend's own message and code.

pub mod postgres;
pub mod sql;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::RelayError;

pub use postgres::PostgresBackend;

/// A JSON object: one record, one filter, or one change set.
pub type Record = Map<String, Value>;

/// The closed set of data operations clients may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Create one or more rows.
    Insert,
    /// Modify rows matching a filter.
    Update,
    /// Remove rows matching a filter.
    Delete,
    /// Read rows.
    Select,
}

impl OperationKind {
    /// Lowercase operation name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Select => "select",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "select" => Ok(Self::Select),
            _ => Err(RelayError::UnsupportedOperation(s.to_string())),
        }
    }
}

/// Parameters of a `select`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    /// Projection; `None` means every column.
    pub columns: Option<Vec<String>>,
    /// Equality filter; `None` means every row.
    pub filter: Option<Record>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub offset: Option<u64>,
}

/// A validated operation ready to be executed against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOperation {
    /// Create every record in `rows`.
    Insert {
        /// Records to create, at least one.
        rows: Vec<Record>,
    },
    /// Set `changes` on every row matching `filter`.
    Update {
        /// Non-empty equality filter.
        filter: Record,
        /// Non-empty set of columns to assign.
        changes: Record,
    },
    /// Remove every row matching `filter`.
    Delete {
        /// Non-empty equality filter.
        filter: Record,
    },
    /// Read rows.
    Select(SelectQuery),
}

impl BackendOperation {
    /// Which of the four operations this is.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Insert { .. } => OperationKind::Insert,
            Self::Update { .. } => OperationKind::Update,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Select(_) => OperationKind::Select,
        }
    }
}

/// Normalized result of a backend operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    /// Rows were created.
    Inserted {
        /// Number of rows created.
        count: u64,
        /// `id` of the first created row, when the table has one.
        first_id: Option<Value>,
    },
    /// Rows were modified.
    Updated {
        /// Number of rows modified.
        count: u64,
    },
    /// Rows were removed.
    Deleted {
        /// Number of rows removed.
        count: u64,
    },
    /// Rows were read.
    Selected {
        /// Matching rows as JSON objects.
        rows: Vec<Value>,
    },
}

/// CRUD capability of the upstream data service.
#[async_trait]
pub trait DataBackend: Send + Sync + fmt::Debug {
    /// Executes `operation` against `table`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for names the backend cannot
    /// address and [`RelayError::Backend`] when the service rejects or
    /// fails the operation.
    async fn execute(
        &self,
        table: &str,
        operation: BackendOperation,
    ) -> Result<OperationOutcome, RelayError>;
}
