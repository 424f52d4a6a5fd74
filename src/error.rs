//! Relay error types with client-facing error code mapping.
//!
//! [`RelayError`] is the central error type for the relay. Every variant
//! that can be caused by a client request is recovered at the session
//! boundary and turned into an error response carrying
//! [`RelayError::error_code`].

/// Server-side error enum.
///
/// # Error Codes
///
/// | Variant                | `errorCode`                       |
/// |------------------------|-----------------------------------|
/// | `Parse`                | `PARSE_ERROR`                     |
/// | `MissingFilter`        | `MISSING_FILTER`                  |
/// | `UnsupportedOperation` | `UNSUPPORTED_OPERATION`           |
/// | `InvalidRequest`       | `INVALID_REQUEST`                 |
/// | `Backend`              | SQLSTATE, or `BACKEND_ERROR`      |
/// | `Transport`            | `TRANSPORT_ERROR`                 |
/// | `Internal`             | `INTERNAL_ERROR`                  |
/// | `Config`               | `CONFIG_ERROR`                    |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Inbound message was not valid JSON.
    #[error("invalid JSON: {0}")]
    Parse(String),

    /// `update` or `delete` issued without a `where` filter.
    #[error("{operation} requires a non-empty `where` filter")]
    MissingFilter {
        /// Operation that was rejected.
        operation: &'static str,
    },

    /// Operation name outside `insert`, `update`, `delete`, `select`.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Request parameters have the wrong shape.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The data backend rejected or failed the operation.
    #[error("{message}")]
    Backend {
        /// Backend-provided message, reported verbatim.
        message: String,
        /// Backend-specific code (PostgreSQL SQLSTATE) if any.
        code: Option<String>,
    },

    /// Send or receive failure on a session transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unexpected fault while handling a request.
    #[error("internal error: {0}")]
    Internal(String),

    /// Missing or malformed startup configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Returns the `errorCode` reported to clients for this variant.
    #[must_use]
    pub fn error_code(&self) -> &str {
        match self {
            Self::Parse(_) => "PARSE_ERROR",
            Self::MissingFilter { .. } => "MISSING_FILTER",
            Self::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Backend { code, .. } => code.as_deref().unwrap_or("BACKEND_ERROR"),
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => Self::Backend {
                message: db.message().to_string(),
                code: db.code().map(|c| c.into_owned()),
            },
            _ => Self::Backend {
                message: err.to_string(),
                code: None,
            },
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn backend_code_is_reported_verbatim() {
        let err = RelayError::Backend {
            message: "duplicate key value violates unique constraint".to_string(),
            code: Some("23505".to_string()),
        };
        assert_eq!(err.error_code(), "23505");
        assert_eq!(
            err.to_string(),
            "duplicate key value violates unique constraint"
        );
    }

    #[test]
    fn backend_without_code_uses_generic_code() {
        let err = RelayError::Backend {
            message: "pool timed out".to_string(),
            code: None,
        };
        assert_eq!(err.error_code(), "BACKEND_ERROR");
    }

    #[test]
    fn missing_filter_names_operation() {
        let err = RelayError::MissingFilter {
            operation: "delete",
        };
        assert_eq!(err.error_code(), "MISSING_FILTER");
        assert!(err.to_string().starts_with("delete"));
    }

    #[test]
    fn serde_error_becomes_parse_error() {
        let Err(e) = serde_json::from_str::<serde_json::Value>("{nope") else {
            panic!("expected parse failure");
        };
        let err = RelayError::from(e);
        assert_eq!(err.error_code(), "PARSE_ERROR");
    }

    #[test]
    fn non_database_sqlx_error_has_no_code() {
        let err = RelayError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, RelayError::Backend { code: None, .. }));
    }
}
