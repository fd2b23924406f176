//! Applications hosted by the echo server

use crate::config::{Config, EventBusConfig};
use anyhow::Result;
use ras_sockjs_bridge::{BusMessage, EventBus, LocalEventBus, install_bridge};
use ras_sockjs_server::{
    SockJsConfig, SockJsHandler, SockJsServer, SockJsSocket, TransportKind, handler_fn,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Writes every message back to its sender
pub fn echo() -> impl SockJsHandler {
    handler_fn(|mut socket: SockJsSocket| async move {
        while let Some(message) = socket.recv().await {
            if socket.send(message).is_err() {
                break;
            }
        }
    })
}

/// Closes every socket as soon as it opens
pub fn close() -> impl SockJsHandler {
    handler_fn(|socket: SockJsSocket| async move { socket.close() })
}

/// Install the echo applications and, when enabled, the event bus bridge
pub fn install(server: &SockJsServer, config: &Config, bus: &Arc<LocalEventBus>) -> Result<()> {
    let app = |prefix: &str| SockJsConfig {
        prefix: prefix.to_string(),
        ..config.sockjs.clone()
    };

    server.install_app(app("/echo"), echo())?;
    server.install_app(app("/close"), close())?;

    let mut disabled_websocket = app("/disabled_websocket_echo");
    disabled_websocket
        .disabled_transports
        .push(TransportKind::WebSocket);
    server.install_app(disabled_websocket, echo())?;

    let mut cookie_needed = app("/cookie_needed_echo");
    cookie_needed.insert_jsessionid = true;
    server.install_app(cookie_needed, echo())?;

    if config.eventbus.enabled {
        install_bridge(
            server,
            app(&config.eventbus.prefix),
            &config.eventbus.inbound,
            &config.eventbus.outbound,
            config.eventbus.bridge.clone(),
            bus.clone(),
        )?;
    }

    Ok(())
}

/// Answer authorisation requests on the bridge's auth address
///
/// Tokens listed in the configuration are granted, everything else denied.
pub fn spawn_auth_service(bus: &Arc<LocalEventBus>, config: &EventBusConfig) -> JoinHandle<()> {
    let (tx, mut requests) = mpsc::unbounded_channel::<BusMessage>();
    bus.subscribe(&config.bridge.auth_address, tx);
    info!(
        "Authorisation service listening on '{}' ({} tokens)",
        config.bridge.auth_address,
        config.auth_tokens.len()
    );

    let bus = bus.clone();
    let tokens = config.auth_tokens.clone();
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let granted = request
                .body
                .get("sessionID")
                .and_then(Value::as_str)
                .is_some_and(|token| tokens.iter().any(|known| known == token));
            debug!("Authorisation request answered: granted={}", granted);

            let Some(reply_to) = request.reply_address else {
                continue;
            };
            let status = if granted { "ok" } else { "denied" };
            let _ = bus.send(&reply_to, json!({ "status": status }), None).await;
        }
    })
}
