//! Installed applications

use crate::config::SockJsConfig;
use crate::handler::{SockJsHandler, SockJsHook};
use crate::registry::SessionRegistry;
use crate::session::{ConnectionOrigin, Session};
use crate::socket::SockJsSocket;
use crate::ServerResult;
use ras_sockjs_types::SessionId;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A handler bound to a prefix and its resolved configuration
pub struct Application {
    prefix: String,
    config: SockJsConfig,
    handler: Arc<dyn SockJsHandler>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("prefix", &self.prefix)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Application {
    pub fn new(config: SockJsConfig, handler: Arc<dyn SockJsHandler>) -> ServerResult<Self> {
        config.validate()?;
        Ok(Self {
            prefix: config.routing_prefix(),
            config,
            handler,
        })
    }

    /// Prefix in routing form ("" for the root)
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn config(&self) -> &SockJsConfig {
        &self.config
    }

    pub(crate) fn create_session(
        &self,
        id: SessionId,
        origin: ConnectionOrigin,
        registry: Weak<SessionRegistry>,
    ) -> Arc<Session> {
        Session::new(
            id,
            self.prefix.clone(),
            self.config.session_timeout_duration(),
            self.config.heartbeat_duration(),
            origin,
            registry,
        )
    }

    /// Hand a freshly opened session to the handler on its own task
    pub(crate) fn open_socket(
        &self,
        session: Arc<Session>,
        inbound: mpsc::UnboundedReceiver<String>,
        hook: Arc<dyn SockJsHook>,
    ) {
        let handler = Arc::clone(&self.handler);
        let prefix = self.prefix.clone();
        let socket = SockJsSocket::new(session, Arc::clone(&hook), inbound);

        tokio::spawn(async move {
            let handle = socket.handle().clone();
            info!("Socket opened: {} (prefix: '{}')", handle.id(), prefix);

            if hook.socket_created(&handle).await {
                handler.handle_socket(socket).await;
            } else {
                debug!(session_id = %handle.id(), "socket vetoed by hook");
                handle.close();
                drop(socket);
            }

            handle.closed().await;
            hook.socket_closed(&handle).await;
            info!("Socket closed: {}", handle.id());
        });
    }
}
