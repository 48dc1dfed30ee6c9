//! The `serve` command: wires the store, bus and monitor into the API.

use anyhow::Context;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use timbel_api::{AppState, build_app};
use timbel_core::ports::PipelineStore;
use timbel_db::{Database, PgPipelineStore};
use timbel_monitor::{BroadcastEventBus, InMemoryPipelineStore, PipelineMonitor};
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tracing::{error, info};

use crate::settings::{ServerConfig, StoreBackend};

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.server.bind,
        store = ?config.store.backend,
        auth = config.auth.enabled,
        "Starting Timbel monitor"
    );

    let store = build_store(&config).await?;
    let bus = BroadcastEventBus::new(config.monitor.channel_capacity);
    let monitor = PipelineMonitor::new(store, Arc::new(bus.clone()), config.monitor.clone())
        .with_bus_metrics(bus.metrics().clone());

    let mut state = AppState::new(Arc::new(monitor));
    if let Some(verifier) = config.auth.verifier()? {
        state = state.with_verifier(verifier);
    }

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(addr = %listener.local_addr()?, "Listening");

    let timeout = config.server.shutdown_timeout();
    let server = axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    tokio::select! {
        result = server => result.context("server error")?,
        () = drain_deadline(timeout) => error!(
            timeout_secs = timeout.as_secs(),
            "Connections still open after shutdown timeout, exiting"
        ),
    }

    info!("Timbel monitor stopped");
    Ok(())
}

async fn build_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn PipelineStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryPipelineStore::new(
            config.monitor.log_retention,
        ))),
        StoreBackend::Postgres => {
            let url = config.store.url.as_deref().unwrap_or_default();
            let db = Database::connect(url, config.store.max_connections)
                .await
                .context("failed to connect to PostgreSQL")?;
            if config.store.migrate {
                db.migrate().await.context("failed to apply migrations")?;
            }
            Ok(Arc::new(PgPipelineStore::new(
                db.pool().clone(),
                config.monitor.log_retention,
            )))
        }
    }
}

async fn shutdown_signal() {
    wait_for_signal().await;
    info!("Shutdown signal received, draining connections");
}

/// Resolves on Ctrl+C or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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

async fn drain_deadline(timeout: Duration) {
    wait_for_signal().await;
    tokio::time::sleep(timeout).await;
}
