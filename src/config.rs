//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). `DATABASE_URL` is the only required
//! key; everything else falls back to a default.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::RelayError;

/// Output format for the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, multi-field lines.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the HTTP/WebSocket server to.
    pub listen_addr: SocketAddr,

    /// PostgreSQL connection string.
    pub database_url: String,

    /// Schema that client data operations run against.
    pub database_schema: String,

    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,

    /// Minimum idle connections in the pool.
    pub database_min_connections: u32,

    /// Timeout in seconds for acquiring a database connection.
    pub database_connect_timeout_secs: u64,

    /// Tables whose row changes are relayed to clients.
    pub watched_tables: Vec<String>,

    /// Install the notify trigger on every watched table at startup.
    pub install_change_triggers: bool,

    /// Seconds between liveness sweeps.
    pub liveness_interval_secs: u64,

    /// Consecutive missed liveness windows before a session is terminated.
    pub liveness_max_missed: u32,

    /// Capacity of each session's outbound frame queue.
    pub session_outbound_capacity: usize,

    /// Capacity of each session's pending request queue.
    pub session_request_queue: usize,

    /// Upper bound on graceful shutdown before the process force-exits.
    pub shutdown_grace_secs: u64,

    /// Process log format.
    pub log_format: LogFormat,
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `DATABASE_URL` is missing or the
    /// bind address cannot be parsed.
    pub fn from_env() -> Result<Self, RelayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `DATABASE_URL` is missing or the
    /// bind address cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| RelayError::Config("DATABASE_URL must be set".to_string()))?;

        let raw_addr = match lookup("LISTEN_ADDR") {
            Some(addr) => addr,
            None => {
                let port: u16 = parse_or(&lookup, "WS_PORT", 3001);
                format!("0.0.0.0:{port}")
            }
        };
        let listen_addr: SocketAddr = raw_addr
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid listen address {raw_addr:?}: {e}")))?;

        let database_schema = lookup("DATABASE_SCHEMA").unwrap_or_else(|| "public".to_string());

        let watched_tables = lookup("WATCHED_TABLES")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            listen_addr,
            database_url,
            database_schema,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10),
            database_min_connections: parse_or(&lookup, "DATABASE_MIN_CONNECTIONS", 1),
            database_connect_timeout_secs: parse_or(&lookup, "DATABASE_CONNECT_TIMEOUT_SECS", 5),
            watched_tables,
            install_change_triggers: parse_bool_or(&lookup, "INSTALL_CHANGE_TRIGGERS", false),
            liveness_interval_secs: parse_or::<u64, _>(&lookup, "LIVENESS_INTERVAL_SECS", 30)
                .max(1),
            liveness_max_missed: parse_or::<u32, _>(&lookup, "LIVENESS_MAX_MISSED", 2)
                .max(1),
            session_outbound_capacity: parse_or::<usize, _>(
                &lookup,
                "SESSION_OUTBOUND_CAPACITY",
                256,
            )
            .max(1),
            session_request_queue: parse_or::<usize, _>(&lookup, "SESSION_REQUEST_QUEUE", 64)
                .max(1),
            shutdown_grace_secs: parse_or(&lookup, "SHUTDOWN_GRACE_SECS", 10),
            log_format,
        })
    }

    /// Liveness sweep interval as a [`Duration`].
    #[must_use]
    pub const fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    /// Shutdown grace period as a [`Duration`].
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Parses `key` as `T`, returning `default` on missing or invalid values.
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a boolean. Accepts `"true"`, `"1"`, `"false"`, `"0"`
/// (case-insensitive). Returns `default` otherwise.
fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
