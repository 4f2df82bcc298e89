//! Server entry point (SPEC_FULL.md §5, §9).
//!
//! Boot order: load + validate config, construct the engine singletons
//! (`HostConnectionManager`, `PersistenceStore`, `DiscoveryEngine`,
//! `BridgeRegistry`), start the discovery poll loop, then serve HTTP +
//! WebSocket until a shutdown signal arrives. Shutdown runs the reverse
//! order: close bridges, disconnect hosts, the persistence store has
//! already flushed every mutation to disk by construction (atomic writes
//! on every call, not a batched flush).

mod auth;
mod config;
mod hub;
mod http;
mod state;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use session_manager_core::bridge::BridgeRegistry;
use session_manager_core::connection::HostConnectionManager;
use session_manager_core::discovery::DiscoveryEngine;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let dir = config::config_dir();
    let server_config = Arc::new(config::load_server_config(&dir)?);
    let hosts = config::load_hosts(&dir)?;
    let host_list: Vec<_> = hosts.values().cloned().collect();

    let connections = Arc::new(HostConnectionManager::new());
    let persistence = Arc::new(session_manager_core::persistence::PersistenceStore::new(config::data_dir()));
    let discovery = Arc::new(DiscoveryEngine::new(
        connections.clone(),
        persistence.clone(),
        host_list,
        server_config.discovery.include_non_assistant,
    ));
    let clients = Arc::new(hub::ClientRegistry::new());
    let bridges = Arc::new(BridgeRegistry::new(connections.clone(), hosts.clone(), clients.clone()));

    let app_state = AppState {
        config: server_config.clone(),
        hosts: Arc::new(RwLock::new(hosts)),
        connections: connections.clone(),
        persistence,
        discovery: discovery.clone(),
        bridges: bridges.clone(),
        clients: clients.clone(),
    };

    spawn_discovery_loop(discovery.clone(), clients.clone(), server_config.discovery.poll_ms);

    let auth_state = Arc::new(server_config.auth.clone());
    let app = Router::new()
        .nest("/api/hosts", http::hosts::router())
        .nest("/api/workspaces", http::workspaces::router())
        .nest("/api/sessions", http::sessions::router())
        .nest("/api/todos", http::todos::router())
        .nest("/api/backlog", http::backlog::router())
        .route(&server_config.websocket.path, axum::routing::get(hub::ws_handler))
        .layer(axum::middleware::from_fn_with_state(auth_state, auth::require_auth))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = format!("{}:{}", server_config.server.host, server_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down: closing bridges and host connections");
    bridges.close_all();
    connections.disconnect_all();

    Ok(())
}

fn spawn_discovery_loop(discovery: Arc<DiscoveryEngine>, clients: Arc<hub::ClientRegistry>, poll_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(poll_ms));
        loop {
            interval.tick().await;
            let snapshot = discovery.run_cycle().await;
            let published = discovery.publishable(&snapshot, false);
            clients.broadcast_sessions(published);
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
