// ABOUTME: Process entry point — loads config, wires AppState, serves the router
// ABOUTME: Shuts down gracefully on SIGTERM/SIGINT, letting in-flight requests finish
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # GHP Reverse Proxy Binary
//!
//! Boots the proxy: loads configuration from the environment, opens the
//! persistence backend, assembles [`AppState`], and serves the router built
//! by [`ghp_reverse_proxy::app`] until asked to stop.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use ghp_reverse_proxy::config::Config;
use ghp_reverse_proxy::crypto::Crypto;
use ghp_reverse_proxy::logging;
use ghp_reverse_proxy::persistence::Persistence;
use ghp_reverse_proxy::session::{OAuthStateStore, SessionStore};
use ghp_reverse_proxy::state::AppState;
use ghp_reverse_proxy::token_service::TokenService;
use ghp_reverse_proxy::utils::http_client;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = setup_configuration()?;
    bootstrap_server(config).await
}

/// Load configuration and install the global tracing subscriber. Logging is
/// initialized before anything else logs, mirroring the order the error
/// taxonomy's `tracing::error!` call inside `AppError`'s `IntoResponse`
/// expects a subscriber to already exist.
fn setup_configuration() -> Result<Config> {
    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e.message))?;
    logging::init(&config.log_level, config.log_format);
    info!(dev_mode = config.dev_mode, port = config.http_port, "configuration loaded");
    Ok(config)
}

async fn bootstrap_server(config: Config) -> Result<()> {
    let persistence = open_persistence(&config).await?;
    let crypto = Crypto::from_hex(&config.encryption_key).context("invalid ENCRYPTION_KEY")?;
    let token_service = TokenService::new(persistence.clone(), config.tokens_max_duration_chrono());

    let state = Arc::new(AppState {
        config,
        persistence,
        crypto,
        sessions: SessionStore::new(),
        oauth_states: OAuthStateStore::new(),
        token_service,
        http_client: http_client::api_client(),
    });

    run_server(state).await
}

/// Open and migrate the configured persistence backend.
///
/// The `sqlite` feature is on by default; building without it falls back to
/// the in-memory reference backend, which never survives a restart.
async fn open_persistence(config: &Config) -> Result<Arc<dyn Persistence>> {
    #[cfg(feature = "sqlite")]
    {
        use ghp_reverse_proxy::persistence::sqlite::SqlitePersistence;
        let backend = SqlitePersistence::connect(&config.database_url)
            .await
            .context("failed to connect to database")?;
        backend.migrate().await.context("failed to run migrations")?;
        info!(database_url = %config.database_url, "sqlite persistence ready");
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        use ghp_reverse_proxy::persistence::memory::InMemoryPersistence;
        let backend = InMemoryPersistence::new();
        backend.migrate().await.context("failed to run migrations")?;
        tracing::warn!("running with in-memory persistence; data will not survive a restart");
        Ok(Arc::new(backend))
    }
}

async fn run_server(state: Arc<AppState>) -> Result<()> {
    let bind_address = state.config.bind_address.clone();
    let port = state.config.http_port;
    let router = ghp_reverse_proxy::app(state);

    let listener = tokio::net::TcpListener::bind((bind_address.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {bind_address}:{port}"))?;

    info!(%bind_address, port, "ready");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("stopped");

    Ok(())
}

/// Resolves on SIGINT (ctrl-c) or, on unix, SIGTERM — whichever fires first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
