//! tablecast server entry point.
//!
//! Connects to PostgreSQL, subscribes to the watched tables and serves
//! WebSocket clients until SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tablecast::api;
use tablecast::app_state::{AppState, SessionLimits};
use tablecast::backend::{DataBackend, PostgresBackend};
use tablecast::config::{LogFormat, RelayConfig};
use tablecast::service::Broadcaster;
use tablecast::source::{ChangeSource, PgChangeSource};
use tablecast::ws::liveness::run_liveness;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().context("failed to load configuration")?;
    init_tracing(config.log_format);
    install_panic_hook();
    tracing::info!(addr = %config.listen_addr, "starting tablecast");

    // Data layer
    let backend = PostgresBackend::connect(&config)
        .await
        .context("failed to connect to database")?;
    let source = PgChangeSource::new(backend.pool().clone());
    if config.install_change_triggers {
        source
            .install_triggers(&config.database_schema, &config.watched_tables)
            .await
            .context("failed to install change triggers")?;
    }
    let changes = source
        .subscribe(&config.watched_tables)
        .await
        .context("failed to subscribe to changes")?;

    // Application state
    let shutdown = CancellationToken::new();
    let backend: Arc<dyn DataBackend> = Arc::new(backend);
    let state = AppState::new(backend, SessionLimits::from(&config), shutdown.clone());

    // Background tasks
    let broadcaster = tokio::spawn(
        Broadcaster::new(Arc::clone(&state.registry)).run(changes, shutdown.clone()),
    );
    let liveness = tokio::spawn(run_liveness(
        Arc::clone(&state.registry),
        config.liveness_interval(),
        config.liveness_max_missed,
        shutdown.clone(),
    ));

    // Server
    let sessions = state.sessions.clone();
    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    let server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        })
    };

    shutdown_signal().await;
    tracing::info!(grace_secs = config.shutdown_grace_secs, "shutting down");
    shutdown.cancel();

    // Upgraded connections outlive `serve`; wait for their close frames too.
    let drained = tokio::time::timeout(config.shutdown_grace(), async {
        let (served, _, _) = tokio::join!(server, broadcaster, liveness);
        sessions.close();
        sessions.wait().await;
        served
    })
    .await;
    match drained {
        Ok(Ok(Ok(()))) => tracing::info!("shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => tracing::error!(error = %e, "server task failed"),
        Err(_) => {
            tracing::warn!("grace period elapsed, forcing exit");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(%location, panic = %info, "panic");
    }));
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                let _ = sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
