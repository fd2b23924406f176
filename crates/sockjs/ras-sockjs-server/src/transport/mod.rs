//! Transport handlers
//!
//! Each handler translates one physical request or socket into session
//! operations: attach, inbound frames, detach. They share the request
//! context below.

pub(crate) mod envelope;
pub(crate) mod receive;
pub(crate) mod send;
pub(crate) mod websocket;

use crate::app::Application;
use crate::handler::SockJsHook;
use crate::registry::SessionRegistry;
use crate::session::{ConnectionOrigin, Session, TransportLease};
use axum::http::HeaderMap;
use ras_sockjs_types::SessionId;
use std::net::SocketAddr;
use std::sync::Arc;

/// Everything a transport handler needs about the request and the server
#[derive(Clone)]
pub(crate) struct TransportContext {
    pub app: Arc<Application>,
    pub registry: Arc<SessionRegistry>,
    pub hook: Arc<dyn SockJsHook>,
    pub headers: HeaderMap,
    pub query: Option<String>,
    pub remote_addr: Option<SocketAddr>,
}

impl TransportContext {
    pub(crate) fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Live session `id` of this application, created if unknown
    pub(crate) fn session(&self, id: &SessionId) -> (Arc<Session>, bool) {
        let origin = ConnectionOrigin {
            headers: self.headers.clone(),
            remote_addr: self.remote_addr,
        };
        let app = &self.app;
        self.registry
            .get_or_create(id, |registry| app.create_session(id.clone(), origin, registry))
    }

    /// Existing session `id`, only if it belongs to this application
    pub(crate) fn existing_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.registry
            .get(id)
            .filter(|session| session.prefix() == self.app.prefix())
    }

    /// Record the open frame and start the application handler
    pub(crate) fn open(&self, lease: &mut TransportLease) {
        if let Some(inbound) = lease.mark_open() {
            self.app
                .open_socket(Arc::clone(lease.session()), inbound, Arc::clone(&self.hook));
        }
    }
}
