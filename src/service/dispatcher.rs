//! Request dispatch: turns client parameters into backend operations.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;

use crate::backend::{
    BackendOperation, DataBackend, OperationKind, OperationOutcome, Record, SelectQuery,
};
use crate::error::RelayError;

/// Field removed from insert records before they reach the backend.
const STRIPPED_INSERT_FIELD: &str = "schema";

/// Validates requests and runs them against the data backend.
///
/// Holds no per-session state; one dispatcher is shared by every session.
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    backend: Arc<dyn DataBackend>,
}

impl RequestDispatcher {
    /// Creates a dispatcher over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn DataBackend>) -> Self {
        Self { backend }
    }

    /// Runs one request.
    ///
    /// A panic inside the backend is caught and reported as
    /// [`RelayError::Internal`].
    ///
    /// # Errors
    ///
    /// - [`RelayError::UnsupportedOperation`] for an unknown operation name.
    /// - [`RelayError::MissingFilter`] for `update`/`delete` without `where`.
    /// - [`RelayError::InvalidRequest`] for malformed parameters.
    /// - [`RelayError::Backend`] when the backend fails the operation.
    pub async fn execute(
        &self,
        operation: &str,
        table: &str,
        data: Value,
    ) -> Result<OperationOutcome, RelayError> {
        let kind: OperationKind = operation.parse()?;
        if table.trim().is_empty() {
            return Err(RelayError::InvalidRequest("table must not be empty".to_string()));
        }
        let planned = plan_operation(kind, data)?;

        AssertUnwindSafe(self.backend.execute(table, planned))
            .catch_unwind()
            .await
            .map_err(|panic| {
                let reason = panic_message(panic.as_ref());
                tracing::error!(
                    table,
                    operation = %kind,
                    reason = %reason,
                    "backend call panicked"
                );
                RelayError::Internal(format!("{kind} on {table} failed unexpectedly"))
            })?
    }
}

/// Builds the backend operation for `kind` from the request's `data`.
///
/// # Errors
///
/// Returns [`RelayError::MissingFilter`] or [`RelayError::InvalidRequest`]
/// when `data` does not fit the operation.
pub fn plan_operation(kind: OperationKind, data: Value) -> Result<BackendOperation, RelayError> {
    match kind {
        OperationKind::Insert => plan_insert(data),
        OperationKind::Update => {
            let mut params = into_params(data, kind)?;
            let filter = require_filter(params.remove("where"), kind)?;
            let changes = match params.remove("data") {
                Some(Value::Object(changes)) if !changes.is_empty() => changes,
                _ => {
                    return Err(RelayError::InvalidRequest(
                        "update requires a non-empty `data` object".to_string(),
                    ));
                }
            };
            Ok(BackendOperation::Update { filter, changes })
        }
        OperationKind::Delete => {
            let mut params = into_params(data, kind)?;
            let filter = require_filter(params.remove("where"), kind)?;
            Ok(BackendOperation::Delete { filter })
        }
        OperationKind::Select => {
            let mut params = into_params(data, kind)?;
            Ok(BackendOperation::Select(SelectQuery {
                columns: parse_columns(params.remove("columns"))?,
                filter: optional_filter(params.remove("where"))?,
                limit: parse_count(params.remove("limit"), "limit")?,
                offset: parse_count(params.remove("offset"), "offset")?,
            }))
        }
    }
}

fn plan_insert(data: Value) -> Result<BackendOperation, RelayError> {
    let records = match data {
        Value::Object(record) => vec![record],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                _ => Err(RelayError::InvalidRequest(
                    "insert records must be objects".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(RelayError::InvalidRequest(
                "insert requires a record or an array of records".to_string(),
            ));
        }
    };
    if records.is_empty() {
        return Err(RelayError::InvalidRequest(
            "insert requires at least one record".to_string(),
        ));
    }
    let rows = records
        .into_iter()
        .map(|mut record| {
            let _ = record.remove(STRIPPED_INSERT_FIELD);
            record
        })
        .collect();
    Ok(BackendOperation::Insert { rows })
}

/// `data` as an object; absent data counts as empty.
fn into_params(data: Value, kind: OperationKind) -> Result<Record, RelayError> {
    match data {
        Value::Object(params) => Ok(params),
        Value::Null => Ok(Record::new()),
        _ => Err(RelayError::InvalidRequest(format!(
            "{kind} parameters must be an object"
        ))),
    }
}

fn require_filter(raw: Option<Value>, kind: OperationKind) -> Result<Record, RelayError> {
    match raw {
        Some(Value::Object(filter)) if !filter.is_empty() => Ok(filter),
        None | Some(Value::Null) | Some(Value::Object(_)) => Err(RelayError::MissingFilter {
            operation: kind.as_str(),
        }),
        Some(_) => Err(RelayError::InvalidRequest(
            "`where` must be an object".to_string(),
        )),
    }
}

fn optional_filter(raw: Option<Value>) -> Result<Option<Record>, RelayError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(filter)) => Ok((!filter.is_empty()).then_some(filter)),
        Some(_) => Err(RelayError::InvalidRequest(
            "`where` must be an object".to_string(),
        )),
    }
}

/// `columns` as a list or a comma-separated string; `*` selects all.
fn parse_columns(raw: Option<Value>) -> Result<Option<Vec<String>>, RelayError> {
    let names: Vec<String> = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name.trim().to_string()),
                _ => Err(RelayError::InvalidRequest(
                    "`columns` entries must be strings".to_string(),
                )),
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(RelayError::InvalidRequest(
                "`columns` must be a list or a comma-separated string".to_string(),
            ));
        }
    };
    if names.is_empty() || names.iter().any(|name| name == "*") {
        return Ok(None);
    }
    Ok(Some(names))
}

/// A non-negative integer; zero and absent both mean "not set".
fn parse_count(raw: Option<Value>, name: &str) -> Result<Option<u64>, RelayError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) => Ok(None),
            Some(count) => Ok(Some(count)),
            None => Err(RelayError::InvalidRequest(format!(
                "`{name}` must be a non-negative integer"
            ))),
        },
        Some(_) => Err(RelayError::InvalidRequest(format!(
            "`{name}` must be a non-negative integer"
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
