//! In-process transport for driving handlers without HTTP
//!
//! A loopback pair behaves like a framed WebSocket connection: the peer
//! plays the client, and dropping it interrupts the session.

use crate::config::DEFAULT_SESSION_TIMEOUT_MS;
use crate::handler::{NoopHook, SockJsHook};
use crate::session::{Attach, ConnectionOrigin, Outbound, Session, TransportLease};
use crate::socket::SockJsSocket;
use ras_sockjs_types::{SessionId, SockJsError, TransportKind};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// The client end of a loopback session
pub struct LoopbackPeer {
    lease: TransportLease,
}

impl LoopbackPeer {
    pub fn session(&self) -> &Arc<Session> {
        self.lease.session()
    }

    /// Send frames as the client would
    pub fn send(&self, message: impl Into<String>) -> Result<(), SockJsError> {
        self.lease.session().receive(vec![message.into()])
    }

    /// Next frame the server wrote
    pub async fn recv(&self) -> Outbound {
        self.lease.recv().await
    }

    /// Acknowledge a close frame returned by [`LoopbackPeer::recv`]
    pub fn close_delivered(&self) {
        self.lease.close_delivered();
    }
}

/// Open a session wired to an in-process peer
pub fn loopback(
    prefix: &str,
    heartbeat_period: Duration,
) -> Result<(SockJsSocket, LoopbackPeer), SockJsError> {
    loopback_with_hook(prefix, heartbeat_period, Arc::new(NoopHook))
}

pub fn loopback_with_hook(
    prefix: &str,
    heartbeat_period: Duration,
    hook: Arc<dyn SockJsHook>,
) -> Result<(SockJsSocket, LoopbackPeer), SockJsError> {
    let session = Session::new(
        SessionId::generate(),
        prefix,
        Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
        heartbeat_period,
        ConnectionOrigin::default(),
        Weak::new(),
    );

    let mut lease = match session.attach(TransportKind::WebSocket) {
        Attach::Lease(lease) => lease,
        // A fresh session has no transport and is never closed
        Attach::Rejected(_) => return Err(SockJsError::SessionClosed(session.id().clone())),
    };
    let (_, inbound) = tokio::sync::mpsc::unbounded_channel();
    let inbound = lease.mark_open().unwrap_or(inbound);

    Ok((
        SockJsSocket::new(Arc::clone(&session), hook, inbound),
        LoopbackPeer { lease },
    ))
}
