//! `LISTEN`/`NOTIFY` change source for PostgreSQL.
//!
//! Each watched table publishes on a channel named `<table>_changes`. The
//! payload is the JSON object built by the `tablecast_notify_change()`
//! trigger function, which [`PgChangeSource::install_triggers`] can create.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgListener;

use super::{ChangeSource, ChangeStream};
use crate::backend::sql::{TableRef, quote_ident};
use crate::domain::{ChangeEvent, ChangeKind};
use crate::error::RelayError;

/// Suffix appended to a table name to form its notification channel.
pub const CHANNEL_SUFFIX: &str = "_changes";

/// PostgreSQL truncates channel names longer than this, and `pg_notify`
/// rejects them.
const MAX_CHANNEL_LEN: usize = 63;

/// Name of the row trigger installed on watched tables.
const TRIGGER_NAME: &str = "tablecast_changes";

/// Delay before polling the listener again after a receive error.
const RECV_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Change source backed by PostgreSQL notifications.
#[derive(Debug, Clone)]
pub struct PgChangeSource {
    pool: PgPool,
}

/// Notification payload published by the trigger function.
#[derive(Debug, Deserialize)]
struct NotifyPayload {
    #[serde(default)]
    table: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
    #[serde(default)]
    commit_timestamp: Option<DateTime<Utc>>,
}

impl PgChangeSource {
    /// Creates a source that opens its listener from `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the notify function in `schema` and attaches a row trigger
    /// to every table in `tables`, replacing an earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for an invalid name and
    /// [`RelayError::Backend`] if any statement fails.
    pub async fn install_triggers(
        &self,
        schema: &str,
        tables: &[String],
    ) -> Result<(), RelayError> {
        let function = format!("{}.tablecast_notify_change", quote_ident(schema)?);
        let trigger = quote_ident(TRIGGER_NAME)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&notify_function_sql(&function))
            .execute(&mut *tx)
            .await?;
        for table in tables {
            let _ = watched_channel(table)?;
            let target = TableRef::new(schema, table)?;
            sqlx::query(&format!("DROP TRIGGER IF EXISTS {trigger} ON {}", target.as_str()))
                .execute(&mut *tx)
                .await?;
            sqlx::query(&format!(
                "CREATE TRIGGER {trigger} AFTER INSERT OR UPDATE OR DELETE ON {} \
                 FOR EACH ROW EXECUTE FUNCTION {function}()",
                target.as_str()
            ))
            .execute(&mut *tx)
            .await?;
            tracing::info!(table = %table, "change trigger installed");
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ChangeSource for PgChangeSource {
    async fn subscribe(&self, collections: &[String]) -> Result<ChangeStream, RelayError> {
        if collections.is_empty() {
            tracing::info!("no watched tables, change relay idle");
            return Ok(futures_util::stream::pending().boxed());
        }

        let channels = collections
            .iter()
            .map(|table| watched_channel(table))
            .collect::<Result<Vec<_>, _>>()?;

        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener
            .listen_all(channels.iter().map(String::as_str))
            .await?;
        tracing::info!(channels = ?channels, "listening for change notifications");

        let stream = futures_util::stream::unfold(listener, |mut listener| async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match parse_notification(notification.channel(), notification.payload()) {
                            Ok(event) => return Some((event, listener)),
                            Err(e) => tracing::warn!(
                                channel = notification.channel(),
                                error = %e,
                                "skipping malformed change notification"
                            ),
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "change listener error, retrying");
                        tokio::time::sleep(RECV_RETRY_DELAY).await;
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Notification channel for `table`.
#[must_use]
pub fn channel_name(table: &str) -> String {
    format!("{table}{CHANNEL_SUFFIX}")
}

/// Validates a watched table name and returns its channel.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] if `table` is not a bare
/// identifier or its channel name exceeds 63 bytes.
pub fn watched_channel(table: &str) -> Result<String, RelayError> {
    let _ = quote_ident(table)?;
    let channel = channel_name(table);
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(RelayError::InvalidRequest(format!(
            "channel name {channel:?} exceeds {MAX_CHANNEL_LEN} bytes"
        )));
    }
    Ok(channel)
}

/// Decodes one notification into a [`ChangeEvent`].
///
/// The table comes from the payload, or from the channel name when the
/// payload omits it. Without a commit timestamp the event is stamped with
/// the receive time.
///
/// # Errors
///
/// Returns [`RelayError::Parse`] if the payload is not the expected JSON
/// object or names an unknown change kind.
pub fn parse_notification(channel: &str, payload: &str) -> Result<ChangeEvent, RelayError> {
    let parsed: NotifyPayload = serde_json::from_str(payload)?;
    let kind: ChangeKind = parsed.kind.parse()?;
    let collection = parsed
        .table
        .or_else(|| channel.strip_suffix(CHANNEL_SUFFIX).map(ToString::to_string))
        .ok_or_else(|| RelayError::Parse(format!("cannot tell table of channel {channel:?}")))?;

    let mut event = ChangeEvent::new(collection, kind, parsed.record, parsed.old_record);
    if let Some(committed) = parsed.commit_timestamp {
        event.timestamp = committed;
    }
    Ok(event)
}

fn notify_function_sql(function: &str) -> String {
    format!(
        "CREATE OR REPLACE FUNCTION {function}() RETURNS trigger AS $$
BEGIN
  PERFORM pg_notify(
    TG_TABLE_NAME || '{CHANNEL_SUFFIX}',
    json_build_object(
      'table', TG_TABLE_NAME,
      'type', TG_OP,
      'record', CASE WHEN TG_OP = 'DELETE' THEN NULL ELSE row_to_json(NEW) END,
      'old_record', CASE WHEN TG_OP = 'INSERT' THEN NULL ELSE row_to_json(OLD) END,
      'commit_timestamp', now()
    )::text
  );
  RETURN NULL;
END;
$$ LANGUAGE plpgsql"
    )
}
