//! The application's view of a session

use crate::handler::SockJsHook;
use crate::session::Session;
use axum::http::HeaderMap;
use ras_sockjs_types::{CloseFrame, SessionId, SessionState, SockJsError, TransportKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Cloneable handle for writing to and closing a socket
///
/// Handles can be moved into other tasks; sending through a handle of a
/// closed socket fails with [`SockJsError::SessionClosed`].
#[derive(Clone)]
pub struct SocketHandle {
    session: Arc<Session>,
    hook: Arc<dyn SockJsHook>,
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SocketHandle {
    pub(crate) fn new(session: Arc<Session>, hook: Arc<dyn SockJsHook>) -> Self {
        Self { session, hook }
    }

    /// Lifecycle hook installed on the server that owns the socket
    pub fn hook(&self) -> &Arc<dyn SockJsHook> {
        &self.hook
    }

    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    /// The transport that opened the socket
    pub fn transport(&self) -> Option<TransportKind> {
        self.session.opened_with()
    }

    /// Headers of the request that created the session
    pub fn headers(&self) -> &HeaderMap {
        &self.session.origin().headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.session.origin().remote_addr
    }

    /// Prefix of the application that accepted the socket
    pub fn prefix(&self) -> &str {
        self.session.prefix()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_open(&self) -> bool {
        self.session.state().is_active()
    }

    /// Queue one message for the remote
    pub fn send(&self, message: impl Into<String>) -> Result<(), SockJsError> {
        self.session.send(message.into())
    }

    /// Close with the default "Go away!" frame
    pub fn close(&self) {
        self.session.close(CloseFrame::go_away());
    }

    pub fn close_with(&self, code: u16, reason: impl Into<String>) {
        self.session.close(CloseFrame::new(code, reason));
    }

    /// Resolves once the session is fully closed
    pub async fn closed(&self) {
        self.session.closed().await
    }
}

/// A socket handed to the application when a session opens
///
/// Inbound messages arrive through [`SockJsSocket::recv`] in the order the
/// client sent them. `None` means the session is closing and nothing more
/// will arrive.
#[derive(Debug)]
pub struct SockJsSocket {
    handle: SocketHandle,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl SockJsSocket {
    pub(crate) fn new(
        session: Arc<Session>,
        hook: Arc<dyn SockJsHook>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            handle: SocketHandle::new(session, hook),
            inbound,
        }
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    pub fn handle(&self) -> &SocketHandle {
        &self.handle
    }

    pub fn id(&self) -> &SessionId {
        self.handle.id()
    }

    pub fn send(&self, message: impl Into<String>) -> Result<(), SockJsError> {
        self.handle.send(message)
    }

    pub fn close(&self) {
        self.handle.close()
    }

    /// Split into the inbound stream and a cloneable handle
    pub fn split(self) -> (SocketHandle, mpsc::UnboundedReceiver<String>) {
        (self.handle, self.inbound)
    }
}
