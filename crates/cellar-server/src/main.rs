//! Cellar server binary.
//!
//! Starts an axum HTTP server with structured logging, database initialization,
//! the real-time hub, and graceful shutdown on SIGTERM/SIGINT.

use cellar_server::{app, config, AppState};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CELLAR_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = cellar_db::create_pool(&config.database.path, config.database.runtime_settings())
        .expect("failed to create database pool; check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = cellar_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied.is_empty() {
            tracing::debug!("database schema up to date");
        } else {
            tracing::info!(migrations = ?applied, "database schema migrated");
        }
    }

    let hub = cellar_hub::Hub::spawn(config.hub.hub_settings());

    let app = app(AppState { pool, hub });
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting cellar server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    tracing::info!("cellar server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
