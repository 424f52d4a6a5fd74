//! WebSocket message types: inbound requests and outbound replies.
//!
//! Inbound text is JSON. An object whose `operation` and `table` are both
//! truthy is a [`ClientRequest`]; any other JSON value is a handshake.
//! `null`, `false`, `0` and `""` are falsy. Outbound frames
//! are flat JSON objects whose shape depends on the variant of
//! [`OutboundMessage`].

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::backend::OperationOutcome;
use crate::domain::{ChangeEvent, ChangeKind};
use crate::error::RelayError;

/// Text of the welcome frame.
pub const WELCOME_MESSAGE: &str = "connected to tablecast relay";

/// Text of the handshake acknowledgment.
pub const ACK_MESSAGE: &str = "message received";

/// A data operation requested by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRequest {
    /// Operation name as sent (`insert`, `update`, `delete`, `select`).
    pub operation: String,
    /// Target table.
    pub table: String,
    /// Opaque correlation token, echoed verbatim.
    pub operation_id: Option<Value>,
    /// Operation-specific parameters (`Null` when absent).
    pub data: Value,
}

/// A parsed inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A data operation.
    Request(ClientRequest),
    /// Anything else: a liveness or handshake message.
    Handshake {
        /// Correlation token, if the client sent one.
        operation_id: Option<Value>,
    },
}

impl InboundMessage {
    /// Classifies one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Parse`] only when `text` is not valid JSON.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut fields) = value else {
            return Ok(Self::Handshake { operation_id: None });
        };

        let operation_id = fields.remove("operationId");
        let operation = fields.remove("operation").filter(is_truthy);
        let table = fields.remove("table").filter(is_truthy);
        match (operation, table) {
            (Some(operation), Some(table)) => Ok(Self::Request(ClientRequest {
                operation: into_name(operation),
                table: into_name(table),
                operation_id,
                data: fields.remove("data").unwrap_or(Value::Null),
            })),
            _ => Ok(Self::Handshake { operation_id }),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Strings are taken as-is; any other JSON value by its text form.
fn into_name(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// `status` field of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Welcome frame.
    Connected,
    /// Handshake acknowledged or operation succeeded.
    Success,
    /// Request failed.
    Error,
}

/// `type` field of broadcast frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastType {
    /// A row changed in a watched table.
    DbChange,
}

/// Sent once when a session opens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Welcome {
    /// Always [`Status::Connected`].
    pub status: Status,
    /// Greeting text.
    pub message: String,
    /// Server clock at send time.
    pub server_time: DateTime<Utc>,
}

/// Reply to a handshake.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    /// Always [`Status::Success`].
    pub status: Status,
    /// Acknowledgment text.
    pub message: String,
    /// Echoed correlation token.
    #[serde(rename = "operationId", skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<Value>,
    /// Server clock at send time.
    pub server_time: DateTime<Utc>,
}

/// Reply to a successful operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessResponse {
    /// Always [`Status::Success`].
    pub status: Status,
    /// Always `true`.
    pub success: bool,
    /// Echoed correlation token.
    #[serde(rename = "operationId", skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<Value>,
    /// Server clock at send time.
    pub server_time: DateTime<Utc>,
    /// Rows created, modified or removed.
    #[serde(rename = "affectedRows", skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    /// `id` of the first created row.
    #[serde(rename = "insertId", skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<Value>,
    /// Rows read by a select.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
}

/// Reply to a failed request or an unparseable frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// Always [`Status::Error`].
    pub status: Status,
    /// Always `false`.
    pub success: bool,
    /// Human-readable description.
    pub error: String,
    /// Stable error code, see [`RelayError::error_code`].
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Echoed correlation token.
    #[serde(rename = "operationId", skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<Value>,
    /// Server clock at send time.
    pub server_time: DateTime<Utc>,
}

/// Broadcast of one row change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DbChange {
    /// Always [`BroadcastType::DbChange`].
    #[serde(rename = "type")]
    pub kind: BroadcastType,
    /// Table the change happened in.
    pub table: String,
    /// `INSERT`, `UPDATE` or `DELETE`.
    pub event: ChangeKind,
    /// New row, or the old row for deletes.
    pub data: Option<Value>,
    /// Row before the change.
    pub old_data: Option<Value>,
    /// When the change was committed.
    pub timestamp: DateTime<Utc>,
}

/// Every frame the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// Session opened.
    Welcome(Welcome),
    /// Handshake acknowledged.
    Ack(Ack),
    /// Operation succeeded.
    Success(SuccessResponse),
    /// Request failed.
    Error(ErrorResponse),
    /// Row change broadcast.
    DbChange(DbChange),
}

impl OutboundMessage {
    /// Welcome frame stamped with the current time.
    #[must_use]
    pub fn welcome() -> Self {
        Self::Welcome(Welcome {
            status: Status::Connected,
            message: WELCOME_MESSAGE.to_string(),
            server_time: Utc::now(),
        })
    }

    /// Handshake acknowledgment.
    #[must_use]
    pub fn ack(operation_id: Option<Value>) -> Self {
        Self::Ack(Ack {
            status: Status::Success,
            message: ACK_MESSAGE.to_string(),
            operation_id,
            server_time: Utc::now(),
        })
    }

    /// Success reply for `outcome`.
    #[must_use]
    pub fn success(operation_id: Option<Value>, outcome: OperationOutcome) -> Self {
        let mut reply = SuccessResponse {
            status: Status::Success,
            success: true,
            operation_id,
            server_time: Utc::now(),
            affected_rows: None,
            insert_id: None,
            data: None,
        };
        match outcome {
            OperationOutcome::Inserted { count, first_id } => {
                reply.affected_rows = Some(count);
                reply.insert_id = first_id;
            }
            OperationOutcome::Updated { count } | OperationOutcome::Deleted { count } => {
                reply.affected_rows = Some(count);
            }
            OperationOutcome::Selected { rows } => reply.data = Some(rows),
        }
        Self::Success(reply)
    }

    /// Error reply for `err`.
    #[must_use]
    pub fn error(err: &RelayError, operation_id: Option<Value>) -> Self {
        Self::Error(ErrorResponse {
            status: Status::Error,
            success: false,
            error: err.to_string(),
            error_code: Some(err.error_code().to_string()),
            operation_id,
            server_time: Utc::now(),
        })
    }

    /// Success or error reply for the result of one request.
    #[must_use]
    pub fn from_result(
        result: Result<OperationOutcome, RelayError>,
        operation_id: Option<Value>,
    ) -> Self {
        match result {
            Ok(outcome) => Self::success(operation_id, outcome),
            Err(err) => Self::error(&err, operation_id),
        }
    }

    /// Broadcast frame for `event`.
    #[must_use]
    pub fn db_change(event: &ChangeEvent) -> Self {
        Self::DbChange(DbChange {
            kind: BroadcastType::DbChange,
            table: event.collection.clone(),
            event: event.kind,
            data: event.current_state().cloned(),
            old_data: event.old_state.clone(),
            timestamp: event.timestamp,
        })
    }

    /// Serializes to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Internal`] if serialization fails.
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self)
            .map_err(|e| RelayError::Internal(format!("failed to encode reply: {e}")))
    }

    /// Serializes to a WebSocket text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Internal`] if serialization fails.
    pub fn to_frame(&self) -> Result<Message, RelayError> {
        self.to_json().map(Message::text)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use serde_json::json;

    use super::*;

    fn encode(msg: &OutboundMessage) -> Value {
        let Ok(text) = msg.to_json() else {
            panic!("reply should encode");
        };
        let Ok(value) = serde_json::from_str(&text) else {
            panic!("reply should be JSON");
        };
        value
    }

    #[test]
    fn request_needs_operation_and_table() {
        let text =
            r#"{"operation":"insert","table":"items","operationId":"a1","data":{"name":"x"}}"#;
        let Ok(InboundMessage::Request(req)) = InboundMessage::parse(text) else {
            panic!("expected request");
        };
        assert_eq!(req.operation, "insert");
        assert_eq!(req.table, "items");
        assert_eq!(req.operation_id, Some(json!("a1")));
        assert_eq!(req.data, json!({"name": "x"}));
    }

    #[test]
    fn missing_data_is_null() {
        let Ok(InboundMessage::Request(req)) =
            InboundMessage::parse(r#"{"operation":"select","table":"items"}"#)
        else {
            panic!("expected request");
        };
        assert_eq!(req.data, Value::Null);
        assert_eq!(req.operation_id, None);
    }

    #[test]
    fn non_string_operation_is_kept_as_text() {
        let Ok(InboundMessage::Request(req)) =
            InboundMessage::parse(r#"{"operation":7,"table":"items","operationId":3}"#)
        else {
            panic!("expected request");
        };
        assert_eq!(req.operation, "7");
        assert_eq!(req.operation_id, Some(json!(3)));
    }

    #[test]
    fn object_without_table_is_handshake() {
        let parsed = InboundMessage::parse(r#"{"operation":"insert","operationId":{"n":1}}"#);
        assert_eq!(
            parsed.ok(),
            Some(InboundMessage::Handshake {
                operation_id: Some(json!({"n": 1}))
            })
        );
    }

    #[test]
    fn falsy_operation_or_table_is_handshake() {
        for text in [
            r#"{"operation":"","table":"items","operationId":"h1"}"#,
            r#"{"operation":"insert","table":null,"operationId":"h1"}"#,
            r#"{"operation":false,"table":"items","operationId":"h1"}"#,
            r#"{"operation":"select","table":0,"operationId":"h1"}"#,
        ] {
            assert_eq!(
                InboundMessage::parse(text).ok(),
                Some(InboundMessage::Handshake {
                    operation_id: Some(json!("h1"))
                }),
                "{text}"
            );
        }
    }

    #[test]
    fn non_object_json_is_handshake() {
        assert_eq!(
            InboundMessage::parse("[1, 2]").ok(),
            Some(InboundMessage::Handshake { operation_id: None })
        );
        assert_eq!(
            InboundMessage::parse("\"ping\"").ok(),
            Some(InboundMessage::Handshake { operation_id: None })
        );
    }

    #[test]
    fn invalid_json_is_parse_error() {
        assert!(matches!(
            InboundMessage::parse("{not json"),
            Err(RelayError::Parse(_))
        ));
    }

    #[test]
    fn welcome_shape() {
        let v = encode(&OutboundMessage::welcome());
        assert_eq!(v["status"], "connected");
        assert_eq!(v["message"], WELCOME_MESSAGE);
        assert!(v["server_time"].is_string());
    }

    #[test]
    fn ack_echoes_operation_id() {
        let v = encode(&OutboundMessage::ack(Some(json!("hb-1"))));
        assert_eq!(v["status"], "success");
        assert_eq!(v["operationId"], "hb-1");

        let v = encode(&OutboundMessage::ack(None));
        assert!(v.get("operationId").is_none());
    }

    #[test]
    fn insert_success_shape() {
        let outcome = OperationOutcome::Inserted {
            count: 1,
            first_id: Some(json!(42)),
        };
        let v = encode(&OutboundMessage::success(Some(json!("a1")), outcome));
        assert_eq!(v["status"], "success");
        assert_eq!(v["success"], true);
        assert_eq!(v["operationId"], "a1");
        assert_eq!(v["affectedRows"], 1);
        assert_eq!(v["insertId"], 42);
        assert!(v.get("data").is_none());
    }

    #[test]
    fn select_success_carries_rows() {
        let outcome = OperationOutcome::Selected {
            rows: vec![json!({"id": 42, "name": "x"})],
        };
        let v = encode(&OutboundMessage::success(Some(json!("b2")), outcome));
        assert_eq!(v["data"], json!([{"id": 42, "name": "x"}]));
        assert!(v.get("affectedRows").is_none());
    }

    #[test]
    fn error_shape_has_code() {
        let err = RelayError::MissingFilter { operation: "update" };
        let v = encode(&OutboundMessage::error(&err, Some(json!("u1"))));
        assert_eq!(v["status"], "error");
        assert_eq!(v["success"], false);
        assert_eq!(v["errorCode"], "MISSING_FILTER");
        assert_eq!(v["operationId"], "u1");
        assert!(v["error"].as_str().is_some_and(|e| e.contains("where")));
    }

    #[test]
    fn delete_broadcast_falls_back_to_old_row() {
        let event = ChangeEvent::new("vehicles", ChangeKind::Delete, None, Some(json!({"id": 5})));
        let v = encode(&OutboundMessage::db_change(&event));
        assert_eq!(v["type"], "db_change");
        assert_eq!(v["table"], "vehicles");
        assert_eq!(v["event"], "DELETE");
        assert_eq!(v["data"], json!({"id": 5}));
        assert_eq!(v["old_data"], json!({"id": 5}));
    }

    #[test]
    fn insert_broadcast_has_null_old_data() {
        let event = ChangeEvent::new("items", ChangeKind::Insert, Some(json!({"id": 1})), None);
        let v = encode(&OutboundMessage::db_change(&event));
        assert_eq!(v["data"], json!({"id": 1}));
        assert!(v["old_data"].is_null());
    }
}
