//! SockJS echo server
//!
//! Hosts the applications the SockJS protocol test suite expects:
//! - `/echo`: echoes every message
//! - `/close`: closes every session as soon as it opens
//! - `/disabled_websocket_echo`: echo without the WebSocket transport
//! - `/cookie_needed_echo`: echo with JSESSIONID cookies
//! - `/eventbus`: a bridge onto an in-process event bus

mod apps;
mod config;

use crate::config::Config;
use anyhow::{Context, Result};
use ras_sockjs_bridge::LocalEventBus;
use ras_sockjs_server::SockJsServer;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    init_tracing(&config)?;

    let server = SockJsServer::with_options(config.server_options());
    let bus = Arc::new(LocalEventBus::new());
    apps::install(&server, &config, &bus)?;
    if config.eventbus.enabled {
        apps::spawn_auth_service(&bus, &config.eventbus);
    }

    let app = server.router().layer(TraceLayer::new_for_http());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("SockJS server listening on http://{}", addr);
    for prefix in server.prefixes() {
        info!("  application: http://{}{}", addr, prefix);
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(server.clone()))
    .await?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_filter()).context("Invalid log filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
    Ok(())
}

/// Resolves on Ctrl-C after closing every session
async fn shutdown_signal(server: SockJsServer) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutting down, closing {} sessions", server.session_count());
    server.shutdown();
}
